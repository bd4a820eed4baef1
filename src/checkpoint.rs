//! Periodic checkpointing: snapshot, history retention and log rotation.
//!
//! The store lock is held only to copy the lists and take the watermark, and
//! again briefly to splice the post-watermark log tail into a fresh log file.
//! Snapshot and history I/O run on the blocking pool with no lock held.

use std::{io, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    history::HistoryRetainer,
    snapshot::write_snapshot,
    store::{ListStore, StoreError},
    wal::{read_prefix, well_formed_lines},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointReport {
    pub last_seq: u64,
    pub lists: usize,
    pub rotated_records: usize,
    pub retained_log_bytes: u64,
    /// Lines in the history file afterwards; `None` if the history write failed.
    pub history_lines: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Nothing was logged since the previous checkpoint.
    Unchanged,
    Completed(CheckpointReport),
}

#[derive(Debug)]
pub struct Checkpointer {
    store: Arc<ListStore>,
    history: HistoryRetainer,
    // Serializes checkpoints and remembers the last covered sequence number.
    last_seq: Mutex<Option<u64>>,
}

impl Checkpointer {
    pub fn new(store: Arc<ListStore>, history_max_lines: usize) -> Self {
        let history = HistoryRetainer::new(store.paths().history.clone(), history_max_lines);
        Self {
            store,
            history,
            last_seq: Mutex::new(None),
        }
    }

    /// Run one checkpoint.
    ///
    /// Any failure before the rotation leaves the previous snapshot and the full
    /// log in place. A history failure is logged and does not stop the rotation.
    /// A retry after a failed rotation hands the same records to the history
    /// again; the retainer drops the ones it already holds.
    pub async fn run_once(&self) -> Result<CheckpointOutcome, StoreError> {
        let mut last_seq = self.last_seq.lock().await;

        let capture = self.store.capture().await;
        let watermark = capture.watermark;
        if watermark.offset == 0 && *last_seq == Some(watermark.seq) {
            return Ok(CheckpointOutcome::Unchanged);
        }

        let lists = capture.snapshot.lists.len();
        let snapshot_path = self.store.paths().snapshot.clone();
        let log_path = self.store.paths().log.clone();
        let history = self.history.clone();
        let (rotated_records, history_lines) = run_blocking(move || {
            write_snapshot(&snapshot_path, &capture.snapshot)?;
            let prefix = read_prefix(&log_path, watermark.offset)?;
            let rotated = well_formed_lines(&prefix);
            let history_lines = match history.retain(&rotated) {
                Ok(n) => Some(n),
                Err(err) => {
                    warn!(path = %history.path().display(), %err, "history write failed");
                    None
                }
            };
            Ok::<_, StoreError>((rotated.len(), history_lines))
        })
        .await??;

        let rotation = self.store.rotate_log(watermark).await?;
        *last_seq = Some(watermark.seq);

        Ok(CheckpointOutcome::Completed(CheckpointReport {
            last_seq: watermark.seq,
            lists,
            rotated_records,
            retained_log_bytes: rotation.retained_bytes,
            history_lines,
        }))
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Persistence(io::Error::other(e)))
}

#[derive(Debug, Clone)]
pub struct CheckpointHandle {
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CheckpointHandle {
    /// Stop the worker and wait for an in-flight checkpoint to finish.
    pub async fn shutdown(&self) {
        let tx = self.shutdown.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        let join = self.join.lock().await.take();
        if let Some(join) = join
            && let Err(err) = join.await
        {
            warn!(%err, "checkpoint worker ended abnormally");
        }
    }
}

pub fn spawn_checkpoint_worker(
    checkpointer: Arc<Checkpointer>,
    interval: Duration,
) -> CheckpointHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => match checkpointer.run_once().await {
                    Ok(CheckpointOutcome::Completed(report)) => info!(
                        last_seq = report.last_seq,
                        lists = report.lists,
                        rotated_records = report.rotated_records,
                        retained_log_bytes = report.retained_log_bytes,
                        "checkpoint saved"
                    ),
                    Ok(CheckpointOutcome::Unchanged) => debug!("checkpoint skipped: no new records"),
                    Err(err) => warn!(%err, "checkpoint failed; will retry next interval"),
                },
                _ = &mut shutdown_rx => break,
            }
        }
        debug!("checkpoint worker stopped");
    });

    CheckpointHandle {
        shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
        join: Arc::new(Mutex::new(Some(join))),
    }
}
