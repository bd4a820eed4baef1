//! Startup reconstruction: snapshot load followed by log replay.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    snapshot::{load_snapshot, read_optional},
    store::{StoreError, StorePaths},
    wal::{LogOp, LogRecord, split_lines},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub snapshot_loaded: bool,
    pub snapshot_last_seq: u64,
    pub snapshot_lists: usize,
    /// Records applied from the log.
    pub replayed: usize,
    /// Records already covered by the snapshot.
    pub skipped_covered: usize,
    pub corrupt_records: usize,
    /// Removes replayed against an empty or unknown list.
    pub empty_removes: usize,
    pub truncated_tail: bool,
    /// Highest sequence number seen in the snapshot or the log.
    pub last_seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovered {
    pub lists: BTreeMap<i64, Vec<i64>>,
    pub report: RecoveryReport,
}

/// Rebuild list state from the snapshot and log under `paths`.
///
/// Read-only: neither file is modified. Missing files are treated as empty.
pub fn recover(paths: &StorePaths) -> Result<Recovered, StoreError> {
    let mut recovered = Recovered::default();

    if let Some(snapshot) = load_snapshot(&paths.snapshot)? {
        let report = &mut recovered.report;
        report.snapshot_loaded = true;
        report.snapshot_last_seq = snapshot.last_seq;
        report.snapshot_lists = snapshot.lists.len();
        report.last_seq = snapshot.last_seq;
        recovered.lists = snapshot.lists;
    }

    if let Some(bytes) = read_optional(&paths.log)? {
        replay(&mut recovered.lists, &bytes, &mut recovered.report);
    }

    let report = &recovered.report;
    info!(
        snapshot_loaded = report.snapshot_loaded,
        snapshot_lists = report.snapshot_lists,
        replayed = report.replayed,
        skipped_covered = report.skipped_covered,
        corrupt_records = report.corrupt_records,
        last_seq = report.last_seq,
        "recovered list state"
    );
    Ok(recovered)
}

/// Apply log `bytes` on top of `lists`.
///
/// Records with a sequence number at or below `report.snapshot_last_seq` are
/// skipped. Malformed lines are skipped. An unterminated final line ends replay
/// even if it decodes: its write never completed, and the log writer cuts it off
/// on open.
pub fn replay(lists: &mut BTreeMap<i64, Vec<i64>>, bytes: &[u8], report: &mut RecoveryReport) {
    for line in split_lines(bytes) {
        if !line.terminated {
            warn!(line = line.number, "ignoring unterminated trailing log record");
            report.truncated_tail = true;
            break;
        }
        let record = match LogRecord::decode(&line.text) {
            Ok(record) => record,
            Err(err) => {
                let err = StoreError::CorruptRecord {
                    line: line.number,
                    reason: err.to_string(),
                };
                warn!(%err, "skipping log record");
                report.corrupt_records += 1;
                continue;
            }
        };

        if let Some(seq) = record.seq {
            report.last_seq = report.last_seq.max(seq);
            if seq <= report.snapshot_last_seq {
                report.skipped_covered += 1;
                continue;
            }
        }

        apply(lists, &record, line.number, report);
        report.replayed += 1;
    }
}

fn apply(
    lists: &mut BTreeMap<i64, Vec<i64>>,
    record: &LogRecord,
    line: usize,
    report: &mut RecoveryReport,
) {
    match record.op {
        LogOp::Append => lists.entry(record.list_id).or_default().push(record.value),
        LogOp::Remove => match lists.get_mut(&record.list_id).and_then(|l| l.pop()) {
            Some(popped) if popped != record.value => {
                warn!(
                    line,
                    list_id = record.list_id,
                    popped,
                    logged = record.value,
                    "replayed remove popped a different value than was logged"
                );
            }
            Some(_) => {}
            None => {
                warn!(line, list_id = record.list_id, "replayed remove on empty list");
                report.empty_removes += 1;
            }
        },
    }
}
