//! In-memory task registry
//!
//! Holds every known task record together with the execution handles of its
//! runner. One `RwLock` guards the whole map; all mutations happen under the
//! write lock so concurrent runners and callers never lose updates.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::snapshot::{NodeRecords, Snapshot};

use super::{NewTask, TaskRecord, TaskStatus};

// ─────────────────────────────────────────────────────────────────
// Entries and Handles
// ─────────────────────────────────────────────────────────────────

/// A record plus the live (non-persisted) runner handles
#[derive(Debug)]
struct TaskEntry {
    record: TaskRecord,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl TaskEntry {
    fn new(record: TaskRecord) -> Self {
        Self {
            record,
            cancel: CancellationToken::new(),
            join: None,
        }
    }
}

/// What a runner needs to be spawned against a freshly created record
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: String,
    pub node_id: String,
    pub cancel: CancellationToken,
}

/// Outcome of merging a snapshot into the live registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub inserted: usize,
    pub overwritten: usize,
}

// ─────────────────────────────────────────────────────────────────
// Task Registry
// ─────────────────────────────────────────────────────────────────

/// Shared mapping task_id → node_id → record
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, BTreeMap<String, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record in `created`.
    ///
    /// Fails with `TaskAlreadyExists` if any record is known under `task_id`.
    pub fn create(&self, task_id: &str, node_id: &str, task: NewTask) -> Result<TaskHandle> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(task_id) {
            return Err(Error::task_exists(task_id));
        }

        let entry = TaskEntry::new(TaskRecord::new(task_id, node_id, task));
        let handle = TaskHandle {
            task_id: task_id.to_string(),
            node_id: node_id.to_string(),
            cancel: entry.cancel.clone(),
        };

        let mut nodes = BTreeMap::new();
        nodes.insert(node_id.to_string(), entry);
        tasks.insert(task_id.to_string(), nodes);

        debug!(task_id = %task_id, node_id = %node_id, "Task record created");
        Ok(handle)
    }

    /// All node records of a task
    pub fn get(&self, task_id: &str) -> Result<NodeRecords> {
        self.tasks
            .read()
            .get(task_id)
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|(node_id, entry)| (node_id.clone(), entry.record.clone()))
                    .collect()
            })
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    /// A single node record
    pub fn get_node(&self, task_id: &str, node_id: &str) -> Option<TaskRecord> {
        self.tasks
            .read()
            .get(task_id)
            .and_then(|nodes| nodes.get(node_id))
            .map(|entry| entry.record.clone())
    }

    /// Current status of a node record
    pub fn status(&self, task_id: &str, node_id: &str) -> Option<TaskStatus> {
        self.tasks
            .read()
            .get(task_id)
            .and_then(|nodes| nodes.get(node_id))
            .map(|entry| entry.record.task_status)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.read().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Record an acknowledged probe.
    ///
    /// Returns false if the record is gone or already terminal; a stop that
    /// lands while a probe is in flight freezes progress where it was.
    pub fn update_progress(&self, task_id: &str, node_id: &str, index: u32, total: u32) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task_id).and_then(|nodes| nodes.get_mut(node_id)) {
            Some(entry) if entry.record.task_status.is_terminal() => {
                debug!(
                    task_id = %task_id,
                    node_id = %node_id,
                    status = %entry.record.task_status,
                    "Progress update after final status ignored"
                );
                false
            }
            Some(entry) => {
                entry.record.advance_progress(index, total);
                true
            }
            None => {
                warn!(task_id = %task_id, node_id = %node_id, "Progress update for unknown task ignored");
                false
            }
        }
    }

    /// Unconditional status flip. Returns false if the record is gone.
    pub fn set_status(&self, task_id: &str, node_id: &str, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task_id).and_then(|nodes| nodes.get_mut(node_id)) {
            Some(entry) => {
                entry.record.apply_status(status);
                true
            }
            None => false,
        }
    }

    /// Move `created` to `running`; any other status is left alone.
    pub fn mark_running(&self, task_id: &str, node_id: &str) -> Option<TaskStatus> {
        self.transition(task_id, node_id, |current| {
            (current == TaskStatus::Created).then_some(TaskStatus::Running)
        })
    }

    /// Resolve a runner's outcome unless the record was stopped meanwhile.
    ///
    /// Returns the status the record ends up in.
    pub fn resolve(&self, task_id: &str, node_id: &str, outcome: TaskStatus) -> Option<TaskStatus> {
        self.transition(task_id, node_id, |current| {
            (current != TaskStatus::Stop).then_some(outcome)
        })
    }

    fn transition<F>(&self, task_id: &str, node_id: &str, decide: F) -> Option<TaskStatus>
    where
        F: FnOnce(TaskStatus) -> Option<TaskStatus>,
    {
        let mut tasks = self.tasks.write();
        let entry = tasks.get_mut(task_id).and_then(|nodes| nodes.get_mut(node_id))?;
        if let Some(next) = decide(entry.record.task_status) {
            entry.record.apply_status(next);
        }
        Some(entry.record.task_status)
    }

    /// Flip every non-terminal node of a task to `stop` and fire the
    /// runners' cancellation tokens.
    ///
    /// Returns how many node records were flipped. Firing a token of a
    /// runner that already exited is harmless.
    pub fn request_stop(&self, task_id: &str) -> Result<usize> {
        let mut tasks = self.tasks.write();
        let nodes = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;

        let mut stopped = 0;
        for entry in nodes.values_mut() {
            if !entry.record.task_status.is_terminal() {
                entry.record.apply_status(TaskStatus::Stop);
                stopped += 1;
            }
            entry.cancel.cancel();
        }
        Ok(stopped)
    }

    /// Store the join handle of the runner spawned for a record
    pub fn attach_runner(&self, task_id: &str, node_id: &str, join: JoinHandle<()>) {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(task_id).and_then(|nodes| nodes.get_mut(node_id)) {
            Some(entry) => entry.join = Some(join),
            None => {
                warn!(task_id = %task_id, node_id = %node_id, "Runner attached to unknown task, aborting it");
                join.abort();
            }
        }
    }

    /// Take the join handles of a task's runners so a caller can await them
    pub fn take_runners(&self, task_id: &str) -> Result<Vec<JoinHandle<()>>> {
        let mut tasks = self.tasks.write();
        let nodes = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        Ok(nodes.values_mut().filter_map(|entry| entry.join.take()).collect())
    }

    /// Forced cancellation of every runner. Safe on finished runners.
    pub fn abort_all(&self) -> usize {
        let mut tasks = self.tasks.write();
        let mut aborted = 0;
        for entry in tasks.values_mut().flat_map(|nodes| nodes.values_mut()) {
            entry.cancel.cancel();
            if let Some(join) = entry.join.take() {
                if !join.is_finished() {
                    aborted += 1;
                }
                join.abort();
            }
        }
        aborted
    }

    /// Bulk-load persisted records.
    ///
    /// Records sharing a (task_id, node_id) with a live entry overwrite it;
    /// the live entry keeps its runner handles so it can still be stopped.
    pub fn merge_from_snapshot(&self, snapshot: Snapshot) -> MergeReport {
        let mut tasks = self.tasks.write();
        let mut report = MergeReport::default();

        for (task_id, records) in snapshot {
            let nodes = tasks.entry(task_id.clone()).or_default();
            for (node_id, record) in records {
                match nodes.get_mut(&node_id) {
                    Some(entry) => {
                        warn!(
                            task_id = %task_id,
                            node_id = %node_id,
                            live_status = %entry.record.task_status,
                            persisted_status = %record.task_status,
                            "Snapshot overwrites live task record"
                        );
                        entry.record = record;
                        report.overwritten += 1;
                    }
                    None => {
                        nodes.insert(node_id, TaskEntry::new(record));
                        report.inserted += 1;
                    }
                }
            }
        }

        report
    }

    /// Serializable copy of every record
    pub fn snapshot(&self) -> Snapshot {
        self.tasks
            .read()
            .iter()
            .map(|(task_id, nodes)| {
                let records = nodes
                    .iter()
                    .map(|(node_id, entry)| (node_id.clone(), entry.record.clone()))
                    .collect();
                (task_id.clone(), records)
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_task() -> NewTask {
        NewTask {
            task_name: "benchmark".into(),
            task_type_name: "load-test".into(),
            task_priority: "high".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let registry = TaskRegistry::new();
        let handle = registry.create("t1", "n1", new_task()).unwrap();

        assert_eq!(handle.task_id, "t1");
        assert_eq!(handle.node_id, "n1");
        assert!(!handle.cancel.is_cancelled());

        let nodes = registry.get("t1").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes["n1"].task_status, TaskStatus::Created);
        assert_eq!(nodes["n1"].task_priority, "high");
    }

    #[test]
    fn test_duplicate_create_fails() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();

        let err = registry.create("t1", "n2", new_task()).unwrap_err();
        assert!(matches!(err, Error::TaskAlreadyExists { ref task_id } if task_id == "t1"));
        assert_eq!(registry.get("t1").unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_task_not_found() {
        let registry = TaskRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::TaskNotFound { .. })));
        assert!(matches!(registry.request_stop("nope"), Err(Error::TaskNotFound { .. })));
        assert!(registry.get_node("nope", "n1").is_none());
    }

    #[test]
    fn test_update_progress_missing_record_is_noop() {
        let registry = TaskRegistry::new();
        assert!(!registry.update_progress("ghost", "n1", 3, 125));
        assert!(!registry.set_status("ghost", "n1", TaskStatus::Running));
    }

    #[test]
    fn test_progress_never_decreases() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();

        registry.update_progress("t1", "n1", 5, 125);
        registry.update_progress("t1", "n1", 2, 125);

        assert_eq!(registry.get_node("t1", "n1").unwrap().task_progress, 5);
    }

    #[test]
    fn test_progress_frozen_after_stop() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();

        assert!(registry.update_progress("t1", "n1", 4, 125));
        registry.request_stop("t1").unwrap();

        assert!(!registry.update_progress("t1", "n1", 5, 125));
        assert_eq!(registry.get_node("t1", "n1").unwrap().task_progress, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_progress_updates() {
        let registry = Arc::new(TaskRegistry::new());
        registry.create("t1", "n1", new_task()).unwrap();

        let writers: Vec<_> = (0..8u32)
            .map(|writer| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for index in (writer..1000).step_by(8) {
                        registry.update_progress("t1", "n1", index, 1000);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        assert_eq!(registry.get_node("t1", "n1").unwrap().task_progress, 999);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stop_freezes_progress() {
        let registry = Arc::new(TaskRegistry::new());
        for task in 0..4 {
            registry.create(&format!("t{}", task), "n1", new_task()).unwrap();
        }

        let writers: Vec<_> = (0..4)
            .map(|task| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let task_id = format!("t{}", task);
                    for index in 0..500 {
                        registry.update_progress(&task_id, "n1", index, 500);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let stopper = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut frozen = Vec::new();
                for task in 0..4 {
                    let task_id = format!("t{}", task);
                    tokio::task::yield_now().await;
                    registry.request_stop(&task_id).unwrap();
                    let record = registry.get_node(&task_id, "n1").unwrap();
                    frozen.push((task_id, record.task_progress));
                }
                frozen
            })
        };

        let frozen = stopper.await.unwrap();
        for writer in writers {
            writer.await.unwrap();
        }

        for (task_id, progress) in frozen {
            let record = registry.get_node(&task_id, "n1").unwrap();
            assert_eq!(record.task_status, TaskStatus::Stop);
            assert_eq!(record.task_progress, progress);
        }
    }

    #[test]
    fn test_mark_running_only_from_created() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();

        assert_eq!(registry.mark_running("t1", "n1"), Some(TaskStatus::Running));

        registry.request_stop("t1").unwrap();
        assert_eq!(registry.mark_running("t1", "n1"), Some(TaskStatus::Stop));
    }

    #[test]
    fn test_resolve_respects_stop() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();
        registry.create("t2", "n1", new_task()).unwrap();

        registry.request_stop("t1").unwrap();

        assert_eq!(registry.resolve("t1", "n1", TaskStatus::Completed), Some(TaskStatus::Stop));
        assert_eq!(registry.resolve("t2", "n1", TaskStatus::Completed), Some(TaskStatus::Completed));
    }

    #[test]
    fn test_request_stop_cancels_token() {
        let registry = TaskRegistry::new();
        let handle = registry.create("t1", "n1", new_task()).unwrap();

        assert_eq!(registry.request_stop("t1").unwrap(), 1);
        assert!(handle.cancel.is_cancelled());
        assert_eq!(registry.status("t1", "n1"), Some(TaskStatus::Stop));
        assert!(registry.get_node("t1", "n1").unwrap().task_end_time.is_some());

        // Second stop is harmless and flips nothing
        assert_eq!(registry.request_stop("t1").unwrap(), 0);
    }

    #[test]
    fn test_stop_leaves_completed_records() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();
        registry.set_status("t1", "n1", TaskStatus::Completed);

        assert_eq!(registry.request_stop("t1").unwrap(), 0);
        assert_eq!(registry.status("t1", "n1"), Some(TaskStatus::Completed));
    }

    #[test]
    fn test_merge_inserts_and_overwrites() {
        let registry = TaskRegistry::new();
        let live = registry.create("t1", "n1", new_task()).unwrap();

        let mut persisted = TaskRecord::new("t1", "n1", new_task());
        persisted.task_status = TaskStatus::Completed;
        persisted.task_progress = 124;
        let fresh = TaskRecord::new("t2", "n7", new_task());

        let mut snapshot = Snapshot::new();
        snapshot.entry("t1".into()).or_default().insert("n1".into(), persisted.clone());
        snapshot.entry("t2".into()).or_default().insert("n7".into(), fresh.clone());

        let report = registry.merge_from_snapshot(snapshot);
        assert_eq!(report, MergeReport { inserted: 1, overwritten: 1 });

        assert_eq!(registry.get_node("t1", "n1").unwrap(), persisted);
        assert_eq!(registry.get_node("t2", "n7").unwrap(), fresh);

        // Overwritten entry keeps its runner token
        registry.request_stop("t1").unwrap();
        assert!(live.cancel.is_cancelled());
    }

    #[test]
    fn test_snapshot_reflects_records() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();
        registry.create("t2", "n2", new_task()).unwrap();
        registry.update_progress("t2", "n2", 9, 125);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["t2"]["n2"].task_progress, 9);
    }

    #[tokio::test]
    async fn test_take_runners_and_abort() {
        let registry = TaskRegistry::new();
        registry.create("t1", "n1", new_task()).unwrap();
        registry.create("t2", "n1", new_task()).unwrap();

        registry.attach_runner("t1", "n1", tokio::spawn(async {}));
        registry.attach_runner(
            "t2",
            "n1",
            tokio::spawn(async { tokio::time::sleep(std::time::Duration::from_secs(3600)).await }),
        );

        let runners = registry.take_runners("t1").unwrap();
        assert_eq!(runners.len(), 1);
        for runner in runners {
            runner.await.unwrap();
        }
        assert!(registry.take_runners("t1").unwrap().is_empty());

        assert_eq!(registry.abort_all(), 1);
        assert_eq!(registry.abort_all(), 0);
    }
}
