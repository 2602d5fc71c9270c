//! JSON snapshot of the task registry
//!
//! Layout: `{ task_id: { node_id: TaskRecord } }`. Execution handles are
//! never persisted. Writes go through a temp file and a rename so a crash
//! mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::supervisor::TaskRecord;

/// Node records of one task, keyed by node id
pub type NodeRecords = BTreeMap<String, TaskRecord>;

/// All persisted tasks, keyed by task id
pub type Snapshot = BTreeMap<String, NodeRecords>;

/// File-backed snapshot storage
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is an empty snapshot.
    pub fn load(&self) -> Result<Snapshot> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No snapshot file, starting empty");
            return Ok(Snapshot::new());
        }

        let raw = fs::read_to_string(&self.path).map_err(|e| Error::SnapshotLoad {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        decode(&raw, &self.path)
    }

    /// Capture and write a snapshot on the blocking pool.
    ///
    /// `capture` runs under the write lock, so concurrent saves land in the
    /// order their state was read.
    pub async fn save_with<F>(self: Arc<Self>, capture: F) -> Result<()>
    where
        F: FnOnce() -> Snapshot + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = self.write_lock.lock();
            self.write(&capture())
        })
        .await
        .map_err(|e| Error::SnapshotWrite {
            path,
            message: e.to_string(),
        })?
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let write_err = |message: String| Error::SnapshotWrite {
            path: self.path.clone(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
            }
        }

        let data = serde_json::to_string_pretty(snapshot).map_err(|e| write_err(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| write_err(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| write_err(e.to_string()))?;

        debug!(path = %self.path.display(), tasks = snapshot.len(), "Snapshot written");
        Ok(())
    }
}

/// Decode a snapshot, skipping node entries that do not parse.
///
/// The document itself must be a JSON object of objects; anything else is
/// a load failure. Keys are authoritative for task and node ids.
pub fn decode(raw: &str, path: &Path) -> Result<Snapshot> {
    let load_err = |message: String| Error::SnapshotLoad {
        path: path.to_path_buf(),
        message,
    };

    let document: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| load_err(e.to_string()))?;
    let tasks = document
        .as_object()
        .ok_or_else(|| load_err("top-level value is not an object".to_string()))?;

    let mut snapshot = Snapshot::new();
    for (task_id, nodes) in tasks {
        let Some(nodes) = nodes.as_object() else {
            warn!(task_id = %task_id, "Skipping snapshot entry: not an object of nodes");
            continue;
        };

        let mut records = NodeRecords::new();
        for (node_id, value) in nodes {
            match serde_json::from_value::<TaskRecord>(value.clone()) {
                Ok(mut record) => {
                    record.task_id = task_id.clone();
                    record.node_id = node_id.clone();
                    records.insert(node_id.clone(), record);
                }
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        node_id = %node_id,
                        error = %e,
                        "Skipping malformed snapshot record"
                    );
                }
            }
        }

        if !records.is_empty() {
            snapshot.insert(task_id.clone(), records);
        }
    }

    Ok(snapshot)
}
