use std::{
    io,
    path::{Path, PathBuf},
};

use crate::{
    snapshot::{read_optional, write_atomic},
    wal::{LogRecord, split_lines},
};

pub const DEFAULT_HISTORY_MAX_LINES: usize = 20;

/// Keeps the last `max_lines` log lines that were rotated out of the log.
///
/// Diagnostic only: recovery never reads this file.
#[derive(Debug, Clone)]
pub struct HistoryRetainer {
    path: PathBuf,
    max_lines: usize,
}

impl HistoryRetainer {
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        let max_lines = if max_lines == 0 {
            DEFAULT_HISTORY_MAX_LINES
        } else {
            max_lines
        };
        Self {
            path: path.into(),
            max_lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn read_lines(&self) -> io::Result<Vec<String>> {
        Ok(read_optional(&self.path)?
            .map(|bytes| split_lines(&bytes).into_iter().map(|l| l.text).collect())
            .unwrap_or_default())
    }

    /// Merge `rotated` into the history file and rewrite it atomically.
    ///
    /// Returns the number of lines in the file afterwards. Records whose sequence
    /// number is at or below the newest one already kept are skipped, so a
    /// checkpoint retried after a failed rotation adds nothing twice. Nothing is
    /// written when no new lines remain.
    pub fn retain(&self, rotated: &[String]) -> io::Result<usize> {
        let previous = self.read_lines()?;
        let kept_seq = newest_seq(&previous);
        let fresh = rotated
            .iter()
            .filter(|line| match (kept_seq, line_seq(line)) {
                (Some(kept), Some(seq)) => seq > kept,
                _ => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        if fresh.is_empty() {
            return Ok(previous.len());
        }

        let merged = merge_tail(previous, &fresh, self.max_lines);
        let mut bytes = Vec::with_capacity(merged.iter().map(|l| l.len() + 1).sum());
        for line in &merged {
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        write_atomic(&self.path, &bytes)?;
        Ok(merged.len())
    }
}

pub fn merge_tail(mut previous: Vec<String>, rotated: &[String], max_lines: usize) -> Vec<String> {
    previous.extend(rotated.iter().cloned());
    if previous.len() > max_lines {
        previous.drain(..previous.len() - max_lines);
    }
    previous
}

fn line_seq(line: &str) -> Option<u64> {
    LogRecord::decode(line).ok()?.seq
}

fn newest_seq(lines: &[String]) -> Option<u64> {
    lines.iter().rev().find_map(|line| line_seq(line))
}
