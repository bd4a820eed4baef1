//! Durable operation log.
//!
//! One JSON object per line, appended under the store lock and synced before the
//! operation is acknowledged. Lines are only ever appended; rotation replaces the
//! file wholesale with the records that arrived after a snapshot's watermark.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOp {
    Append,
    Remove,
}

/// A single logged mutation.
///
/// For `remove` the value is the element that was popped. `seq` is absent in
/// logs written before sequence numbers existed; such records are always replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub op: LogOp,
    pub list_id: i64,
    #[serde(default)]
    pub value: i64,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl LogRecord {
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn encode_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Log position captured together with a state copy.
///
/// `seq` is the last sequence number covered by the copy, `offset` the log length
/// in bytes at that moment. Everything before `offset` is reflected in the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Watermark {
    pub seq: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    pub dropped_bytes: u64,
    pub retained_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number within the file.
    pub number: usize,
    pub text: String,
    /// False only for a final line with no newline (a write cut short by a crash).
    pub terminated: bool,
}

/// Split raw log bytes into non-blank lines.
pub fn split_lines(bytes: &[u8]) -> Vec<RawLine> {
    let mut out = Vec::new();
    let mut rest = bytes;
    let mut number = 0;
    while !rest.is_empty() {
        number += 1;
        let (line, terminated, next) = match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => (&rest[..pos], true, &rest[pos + 1..]),
            None => (rest, false, &rest[rest.len()..]),
        };
        rest = next;
        let text = String::from_utf8_lossy(line).trim_end_matches('\r').to_string();
        if text.trim().is_empty() {
            continue;
        }
        out.push(RawLine {
            number,
            text,
            terminated,
        });
    }
    out
}

/// Lines of `bytes` that decode as records. Others are reported and dropped.
pub fn well_formed_lines(bytes: &[u8]) -> Vec<String> {
    split_lines(bytes)
        .into_iter()
        .filter_map(|line| match LogRecord::decode(&line.text) {
            Ok(_) => Some(line.text),
            Err(err) => {
                warn!(line = line.number, %err, "dropping corrupt log record during rotation");
                None
            }
        })
        .collect()
}

/// Read the first `len` bytes of the log.
///
/// Bytes below a watermark offset are never rewritten while the log is open, so
/// this is safe to call without the store lock.
pub fn read_prefix(path: &Path, len: u64) -> io::Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[derive(Debug)]
pub struct WalWriter {
    path: PathBuf,
    file: File,
    len: u64,
    next_seq: u64,
    last_time: i64,
}

impl WalWriter {
    /// Open (or create) the log for appending.
    ///
    /// A trailing partial line is cut off so new records start on a clean line.
    pub fn open(path: &Path, next_seq: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = open_append(path, false)?;
        let mut len = file.metadata()?.len();
        if len > 0 {
            let clean = last_line_end(&mut file, len)?;
            if clean < len {
                warn!(
                    path = %path.display(),
                    dropped_bytes = len - clean,
                    "truncating partial trailing log line"
                );
                file.set_len(clean)?;
                file.sync_all()?;
                len = clean;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            next_seq: next_seq.max(1),
            last_time: 0,
        })
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn watermark(&self) -> Watermark {
        Watermark {
            seq: self.last_seq(),
            offset: self.len,
        }
    }

    /// Append one record and sync it to disk.
    ///
    /// On failure the file is cut back to its previous length so a half-written
    /// record never shows up at replay.
    pub fn append_record(&mut self, op: LogOp, list_id: i64, value: i64) -> io::Result<LogRecord> {
        let record = LogRecord {
            op,
            list_id,
            value,
            time: self.next_time(),
            seq: Some(self.next_seq),
        };
        let line = record.encode_line().map_err(io::Error::other)?;

        if let Err(err) = self.write_synced(&line) {
            self.rollback();
            return Err(err);
        }

        self.len += line.len() as u64;
        self.next_seq += 1;
        self.last_time = record.time;
        Ok(record)
    }

    /// Drop everything before `watermark.offset`, keeping later records.
    ///
    /// The retained tail goes to a sibling temp file which is synced and renamed
    /// over the log. The temp file's handle becomes the new append handle, so
    /// there is no window where appends could land on the unlinked file.
    pub fn rotate(&mut self, watermark: Watermark) -> io::Result<Rotation> {
        if watermark.offset == 0 {
            return Ok(Rotation {
                dropped_bytes: 0,
                retained_bytes: self.len,
            });
        }
        if watermark.offset > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "watermark offset {} beyond log length {}",
                    watermark.offset, self.len
                ),
            ));
        }

        let mut tail = vec![0u8; (self.len - watermark.offset) as usize];
        self.file.seek(SeekFrom::Start(watermark.offset))?;
        self.file.read_exact(&mut tail)?;

        let tmp_path = sibling_tmp_path(&self.path)?;
        let mut tmp = open_append(&tmp_path, true)?;
        tmp.write_all(&tail)?;
        tmp.flush()?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path);

        self.file = tmp;
        let rotation = Rotation {
            dropped_bytes: watermark.offset,
            retained_bytes: tail.len() as u64,
        };
        self.len = rotation.retained_bytes;
        debug!(
            path = %self.path.display(),
            dropped_bytes = rotation.dropped_bytes,
            retained_bytes = rotation.retained_bytes,
            "log rotated"
        );
        Ok(rotation)
    }

    fn write_synced(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.file.sync_data()
    }

    fn rollback(&mut self) {
        if let Err(err) = self.file.set_len(self.len) {
            warn!(path = %self.path.display(), %err, "failed to roll back partial log write");
        }
    }

    fn next_time(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        now.max(self.last_time.saturating_add(1))
    }
}

fn open_append(path: &Path, truncate: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).append(true).create(true);
    if truncate {
        // `truncate` cannot be combined with `append` in OpenOptions.
        let file = opts.open(path)?;
        file.set_len(0)?;
        return Ok(file);
    }
    opts.open(path)
}

fn last_line_end(file: &mut File, len: u64) -> io::Result<u64> {
    let mut buf = [0u8; 4096];
    let mut end = len;
    while end > 0 {
        let start = end.saturating_sub(buf.len() as u64);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|b| *b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

pub(crate) fn sibling_tmp_path(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    Ok(path.with_file_name(format!("{}.tmp", file_name.to_string_lossy())))
}

pub(crate) fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
