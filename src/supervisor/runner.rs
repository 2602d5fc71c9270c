//! Task runner
//!
//! Drives one task on one node: probes the worker once per step, sleeps a
//! jittered delay between steps, then sends a single finish notice.
//!
//! Cancellation is cooperative. The stop flag is read at the top of every
//! step and the cancellation token cuts the jitter sleep short, but an
//! in-flight probe is always allowed to return. A stop therefore takes
//! effect within one probe round-trip.
//!
//! With a snapshot store attached, the record is written when the runner
//! starts, after acknowledged probes at most once per `progress_interval`,
//! and once more in its final state.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::snapshot::SnapshotStore;
use crate::worker::{WorkerClient, WorkerEndpoint};

use super::{TaskRegistry, TaskStatus, DEFAULT_STEP_BUDGET};

// ─────────────────────────────────────────────────────────────────
// Runner Configuration
// ─────────────────────────────────────────────────────────────────

/// Polling loop parameters
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of probes per task
    pub step_budget: u32,

    /// Lower bound of the inter-step delay
    pub step_delay_min: Duration,

    /// Upper bound of the inter-step delay
    pub step_delay_max: Duration,

    /// Resolve to `failed` when the finish notice is not acknowledged
    pub fail_on_finish_error: bool,

    /// Minimum spacing of snapshot writes for progress updates
    pub progress_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            step_delay_min: Duration::from_secs(3),
            step_delay_max: Duration::from_secs(5),
            fail_on_finish_error: true,
            progress_interval: Duration::from_secs(1),
        }
    }
}

impl RunnerConfig {
    /// Pick a random delay in `[step_delay_min, step_delay_max]`
    pub fn jitter(&self) -> Duration {
        let min = self.step_delay_min.as_millis() as u64;
        let max = self.step_delay_max.as_millis() as u64;
        if max <= min {
            return self.step_delay_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

// ─────────────────────────────────────────────────────────────────
// Run Outcome
// ─────────────────────────────────────────────────────────────────

/// How a runner's loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Budget exhausted, finish acknowledged
    Completed,
    /// Budget exhausted, finish not acknowledged
    FinishFailed,
    /// Stop observed before `at_step` was probed
    Stopped { at_step: u32 },
}

// ─────────────────────────────────────────────────────────────────
// Task Runner
// ─────────────────────────────────────────────────────────────────

/// One task-on-node execution
pub struct TaskRunner {
    config: RunnerConfig,
    registry: Arc<TaskRegistry>,
    client: Arc<dyn WorkerClient>,
    store: Option<Arc<SnapshotStore>>,
    last_persist: Option<Instant>,
    endpoint: WorkerEndpoint,
    task_id: String,
    node_id: String,
    priority: String,
    task_type_name: String,
    cancel: CancellationToken,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RunnerConfig,
        registry: Arc<TaskRegistry>,
        client: Arc<dyn WorkerClient>,
        endpoint: WorkerEndpoint,
        task_id: impl Into<String>,
        node_id: impl Into<String>,
        priority: impl Into<String>,
        task_type_name: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            client,
            store: None,
            last_persist: None,
            endpoint,
            task_id: task_id.into(),
            node_id: node_id.into(),
            priority: priority.into(),
            task_type_name: task_type_name.into(),
            cancel,
        }
    }

    /// Persist the registry as the runner makes progress
    pub fn with_snapshot_store(mut self, store: Option<Arc<SnapshotStore>>) -> Self {
        self.store = store;
        self
    }

    fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
            || self.registry.status(&self.task_id, &self.node_id) == Some(TaskStatus::Stop)
    }

    /// Run the polling loop to completion or cancellation
    pub async fn run(mut self) -> RunOutcome {
        let budget = self.config.step_budget;
        info!(
            task_id = %self.task_id,
            node_id = %self.node_id,
            task_type_name = %self.task_type_name,
            worker = %self.endpoint,
            "Starting task"
        );

        let mut stopped_at = None;
        for step in 0..budget {
            if self.stop_requested() {
                info!(task_id = %self.task_id, node_id = %self.node_id, step, "Task stopped");
                stopped_at = Some(step);
                break;
            }
            if step == 0 {
                self.registry.mark_running(&self.task_id, &self.node_id);
                info!(task_id = %self.task_id, node_id = %self.node_id, "Task running");
                self.last_persist = Some(Instant::now());
                self.persist().await;
            }

            self.probe_step(step, budget).await;

            if step + 1 < budget {
                let delay = self.config.jitter();
                debug!(task_id = %self.task_id, delay_ms = delay.as_millis() as u64, "Waiting before next probe");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        // A stop that arrives during the last probe still counts
        if stopped_at.is_none() && self.stop_requested() {
            stopped_at = Some(budget);
        }

        let outcome = self.finish(stopped_at).await;
        self.persist().await;
        outcome
    }

    async fn probe_step(&mut self, step: u32, budget: u32) {
        let result = self
            .client
            .probe(&self.endpoint, &self.task_id, &self.node_id, step)
            .await;

        match result {
            Ok(()) => {
                if !self
                    .registry
                    .update_progress(&self.task_id, &self.node_id, step, budget)
                {
                    debug!(task_id = %self.task_id, step, "Probe acknowledged after stop, progress not recorded");
                    return;
                }
                info!(
                    task_id = %self.task_id,
                    node_id = %self.node_id,
                    step,
                    total = budget,
                    progress = %format!("{:.1}%", f64::from(step) / f64::from(budget) * 100.0),
                    priority = %self.priority,
                    "Task processing"
                );
                self.persist_progress().await;
            }
            Err(e) => {
                let failure = Error::ProbeFailed {
                    task_id: self.task_id.clone(),
                    node_id: self.node_id.clone(),
                    step,
                    message: e.to_string(),
                };
                warn!(
                    error = %failure.format_for_log(),
                    retryable = e.is_retryable(),
                    "Probe failed, continuing"
                );
            }
        }
    }

    async fn finish(&self, stopped_at: Option<u32>) -> RunOutcome {
        let result = self
            .client
            .finish(&self.endpoint, &self.task_id, &self.node_id)
            .await;

        if let Some(at_step) = stopped_at {
            if let Err(e) = result {
                debug!(task_id = %self.task_id, error = %e, "Finish notice after stop not acknowledged");
            }
            return RunOutcome::Stopped { at_step };
        }

        match result {
            Ok(()) => {
                let status = self
                    .registry
                    .resolve(&self.task_id, &self.node_id, TaskStatus::Completed);
                info!(task_id = %self.task_id, node_id = %self.node_id, status = ?status, "Task completed");
                RunOutcome::Completed
            }
            Err(e) => {
                let failure = Error::FinishFailed {
                    task_id: self.task_id.clone(),
                    node_id: self.node_id.clone(),
                    message: e.to_string(),
                };
                error!(error = %failure.format_for_log(), "Worker did not acknowledge finish");
                if self.config.fail_on_finish_error {
                    self.registry
                        .resolve(&self.task_id, &self.node_id, TaskStatus::Failed);
                }
                RunOutcome::FinishFailed
            }
        }
    }

    /// Write progress unless the last write is younger than `progress_interval`
    async fn persist_progress(&mut self) {
        if self.store.is_none() {
            return;
        }
        if let Some(last) = self.last_persist {
            if last.elapsed() < self.config.progress_interval {
                return;
            }
        }
        self.last_persist = Some(Instant::now());
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
