//! Supervisor service
//!
//! The public face of the crate: create a task bound to a worker, read its
//! status, stop it. Creation returns as soon as the record exists and the
//! runner is spawned; worker reachability never affects it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::snapshot::{NodeRecords, SnapshotStore};
use crate::worker::{WorkerClient, WorkerEndpoint};

use super::{MergeReport, NewTask, RunnerConfig, TaskRecord, TaskRegistry, TaskRunner};

/// Arguments of a create call
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub task_type_name: String,
    pub task_id: String,
    pub node_id: String,
    pub task_name: String,
    pub priority: String,
    /// `host:port` or base URL of the worker that executes the task
    pub worker_address: String,
    pub task_type: Option<String>,
}

/// Owns the registry and spawns one runner per created task
pub struct Supervisor {
    config: RunnerConfig,
    scheme: String,
    registry: Arc<TaskRegistry>,
    client: Arc<dyn WorkerClient>,
    store: Option<Arc<SnapshotStore>>,
}

impl Supervisor {
    pub fn new(config: RunnerConfig, scheme: impl Into<String>, client: Arc<dyn WorkerClient>) -> Self {
        Self {
            config,
            scheme: scheme.into(),
            registry: Arc::new(TaskRegistry::new()),
            client,
            store: None,
        }
    }

    /// Persist the registry after every state change
    pub fn with_snapshot_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────

    /// Create a task and start driving it against its worker
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<TaskRecord> {
        let endpoint = WorkerEndpoint::parse(&request.worker_address, &self.scheme)?;

        let handle = self.registry.create(
            &request.task_id,
            &request.node_id,
            NewTask {
                task_name: request.task_name,
                task_type: request.task_type,
                task_type_name: request.task_type_name.clone(),
                task_priority: request.priority.clone(),
                task_destination: Some(request.worker_address),
                task_total: self.config.step_budget,
            },
        )?;

        let runner = TaskRunner::new(
            self.config.clone(),
            self.registry.clone(),
            self.client.clone(),
            endpoint,
            handle.task_id.clone(),
            handle.node_id.clone(),
            request.priority,
            request.task_type_name,
            handle.cancel.clone(),
        )
        .with_snapshot_store(self.store.clone());

        let join = tokio::spawn(async move {
            let outcome = runner.run().await;
            debug!(outcome = ?outcome, "Runner exited");
        });
        self.registry
            .attach_runner(&handle.task_id, &handle.node_id, join);

        info!(task_id = %handle.task_id, node_id = %handle.node_id, "Task created");
        self.persist().await;

        self.registry
            .get_node(&handle.task_id, &handle.node_id)
            .ok_or_else(|| Error::task_not_found(&handle.task_id))
    }

    /// All node records of a task
    pub fn get_status(&self, task_id: &str) -> Result<NodeRecords> {
        self.registry.get(task_id)
    }

    /// Stop every node of a task. Returns how many records were flipped.
    pub async fn stop_task(&self, task_id: &str) -> Result<usize> {
        let stopped = self.registry.request_stop(task_id)?;
        info!(task_id = %task_id, stopped, "Stop requested");
        self.persist().await;
        Ok(stopped)
    }

    /// Merge persisted records into the live registry.
    ///
    /// An unreadable snapshot is logged and leaves the registry untouched.
    pub fn merge_snapshot(&self, store: &SnapshotStore) -> MergeReport {
        match store.load() {
            Ok(snapshot) => {
                let report = self.registry.merge_from_snapshot(snapshot);
                info!(
                    path = %store.path().display(),
                    inserted = report.inserted,
                    overwritten = report.overwritten,
                    "Snapshot merged"
                );
                report
            }
            Err(e) => {
                warn!(error = %e.format_for_log(), "Ignoring unreadable snapshot");
                MergeReport::default()
            }
        }
    }

    /// Wait until every runner of a task has exited, then return its records
    pub async fn wait_for(&self, task_id: &str) -> Result<NodeRecords> {
        for join in self.registry.take_runners(task_id)? {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    warn!(task_id = %task_id, error = %e, "Runner panicked");
                }
            }
        }
        self.registry.get(task_id)
    }

    /// Abort every runner and write a final snapshot
    pub async fn shutdown(&self) {
        let aborted = self.registry.abort_all();
        if aborted > 0 {
            info!(aborted, "Aborted running tasks");
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let registry = self.registry.clone();
        if let Err(e) = store.save_with(move || registry.snapshot()).await {
            warn!(error = %e.format_for_log(), "Failed to persist task snapshot");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
