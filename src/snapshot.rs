use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    store::StoreError,
    wal::{sibling_tmp_path, sync_parent_dir},
};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Point-in-time copy of every list plus the last log sequence it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    #[serde(default)]
    pub last_seq: u64,
    #[serde(default)]
    pub lists: BTreeMap<i64, Vec<i64>>,
}

impl Snapshot {
    pub fn new(last_seq: u64, lists: BTreeMap<i64, Vec<i64>>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            last_seq,
            lists,
        }
    }
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, StoreError> {
    let corrupt = |e: serde_json::Error| StoreError::CorruptSnapshot(e.to_string());
    let doc: serde_json::Value = serde_json::from_slice(bytes).map_err(corrupt)?;
    // Older snapshot files are a bare `{"<list id>": [values]}` map.
    let snapshot = if doc.get("schema_version").is_some() {
        serde_json::from_slice::<Snapshot>(bytes).map_err(corrupt)?
    } else {
        let lists = serde_json::from_slice::<BTreeMap<i64, Vec<i64>>>(bytes).map_err(corrupt)?;
        Snapshot::new(0, lists)
    };
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersionMismatch {
            expected: SNAPSHOT_SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }
    Ok(snapshot)
}

/// Load the current snapshot. A missing file means a cold start.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, StoreError> {
    match read_optional(path)? {
        Some(bytes) => decode_snapshot(&bytes).map(Some),
        None => Ok(None),
    }
}

pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

pub(crate) fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Replace `path` with `bytes` via a synced sibling temp file and rename.
///
/// Readers see either the old file or the new one, never a partial write.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = sibling_tmp_path(path)?;
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        if !bytes.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        file.flush()?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    sync_parent_dir(path);
    Ok(())
}
