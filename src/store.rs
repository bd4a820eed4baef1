use std::{
    collections::BTreeMap,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    recovery::{RecoveryReport, recover},
    snapshot::Snapshot,
    wal::{LogOp, Rotation, WalWriter, Watermark},
};

#[derive(Debug)]
pub enum StoreError {
    EmptyList { list_id: i64 },
    IndexOutOfRange { list_id: i64, index: i64, len: usize },
    Persistence(io::Error),
    CorruptSnapshot(String),
    CorruptRecord { line: usize, reason: String },
    SchemaVersionMismatch { expected: u32, got: u32 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyList { list_id } => write!(f, "list {list_id} is empty"),
            Self::IndexOutOfRange {
                list_id,
                index,
                len,
            } => write!(
                f,
                "index {index} out of range for list {list_id} of length {len}"
            ),
            Self::Persistence(e) => write!(f, "persistence error: {e}"),
            Self::CorruptSnapshot(reason) => write!(f, "corrupt snapshot: {reason}"),
            Self::CorruptRecord { line, reason } => {
                write!(f, "corrupt log record at line {line}: {reason}")
            }
            Self::SchemaVersionMismatch { expected, got } => {
                write!(f, "schema_version mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Persistence(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Persistence(io::Error::other(value))
    }
}

/// On-disk locations of the log, snapshot and history files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub log: PathBuf,
    pub snapshot: PathBuf,
    pub history: PathBuf,
}

impl StorePaths {
    /// History defaults to the log path with `.history` appended.
    pub fn new(log: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Self {
        let log = log.into();
        let history = default_history_path(&log);
        Self {
            log,
            snapshot: snapshot.into(),
            history,
        }
    }

    pub fn with_history(mut self, history: impl Into<PathBuf>) -> Self {
        self.history = history.into();
        self
    }
}

pub fn default_history_path(log: &Path) -> PathBuf {
    let mut name = OsString::from(log.as_os_str());
    name.push(".history");
    PathBuf::from(name)
}

/// List state captured under the lock for a checkpoint.
#[derive(Debug, Clone)]
pub struct StateCapture {
    pub snapshot: Snapshot,
    pub watermark: Watermark,
}

#[derive(Debug)]
struct StoreInner {
    lists: BTreeMap<i64, Vec<i64>>,
    wal: WalWriter,
}

/// In-memory lists guarded by one lock, with every mutation logged first.
///
/// The log record for a mutation is written and synced while the lock is held
/// and before memory changes, so log order is mutation order and a failed write
/// leaves memory untouched. Log I/O runs on the blocking pool with the guard
/// moved into the blocking task.
#[derive(Debug)]
pub struct ListStore {
    paths: StorePaths,
    inner: Arc<Mutex<StoreInner>>,
}

impl ListStore {
    /// Recover state from disk and open the log for appending.
    pub fn open(paths: StorePaths) -> Result<(Self, RecoveryReport), StoreError> {
        let recovered = recover(&paths)?;
        let wal = WalWriter::open(&paths.log, recovered.report.last_seq + 1)?;
        Ok((
            Self::from_parts(paths, recovered.lists, wal),
            recovered.report,
        ))
    }

    fn from_parts(paths: StorePaths, lists: BTreeMap<i64, Vec<i64>>, wal: WalWriter) -> Self {
        Self {
            paths,
            inner: Arc::new(Mutex::new(StoreInner { lists, wal })),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub async fn append(&self, list_id: i64, value: i64) -> Result<(), StoreError> {
        self.with_log(move |inner| {
            let record = inner.wal.append_record(LogOp::Append, list_id, value)?;
            let list = inner.lists.entry(list_id).or_default();
            list.push(value);
            debug!(list_id, value, seq = ?record.seq, len = list.len(), "append");
            Ok(())
        })
        .await
    }

    pub async fn remove(&self, list_id: i64) -> Result<i64, StoreError> {
        self.with_log(move |inner| {
            let Some(value) = inner.lists.get(&list_id).and_then(|l| l.last().copied()) else {
                return Err(StoreError::EmptyList { list_id });
            };
            let record = inner.wal.append_record(LogOp::Remove, list_id, value)?;
            if let Some(list) = inner.lists.get_mut(&list_id) {
                list.pop();
            }
            debug!(list_id, value, seq = ?record.seq, "remove");
            Ok(value)
        })
        .await
    }

    pub async fn size(&self, list_id: i64) -> usize {
        let inner = self.inner.lock().await;
        inner.lists.get(&list_id).map_or(0, Vec::len)
    }

    pub async fn get(&self, list_id: i64, index: i64) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        let list = inner.lists.get(&list_id).map(Vec::as_slice).unwrap_or(&[]);
        usize::try_from(index)
            .ok()
            .and_then(|i| list.get(i).copied())
            .ok_or(StoreError::IndexOutOfRange {
                list_id,
                index,
                len: list.len(),
            })
    }

    /// Copy of every list.
    pub async fn lists(&self) -> BTreeMap<i64, Vec<i64>> {
        self.inner.lock().await.lists.clone()
    }

    /// Deep copy of the lists together with the log watermark they reflect.
    pub async fn capture(&self) -> StateCapture {
        let inner = self.inner.lock().await;
        let watermark = inner.wal.watermark();
        StateCapture {
            snapshot: Snapshot::new(watermark.seq, inner.lists.clone()),
            watermark,
        }
    }

    /// Drop log records up to `watermark`, keeping anything appended after it.
    pub async fn rotate_log(&self, watermark: Watermark) -> Result<Rotation, StoreError> {
        self.with_log(move |inner| Ok(inner.wal.rotate(watermark)?)).await
    }

    /// Run `f` on the blocking pool while holding the store lock.
    ///
    /// The guard lives inside the blocking task, so the lock is released only
    /// after `f` returns even if the calling future is dropped.
    async fn with_log<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreInner) -> Result<T, StoreError> + Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut *guard))
            .await
            .map_err(|e| StoreError::Persistence(io::Error::other(e)))?
    }
}
