//! Task record state
//!
//! The observable state of one task executing on one worker node.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default number of probes per task: 100% in steps of 0.8%
pub const DEFAULT_STEP_BUDGET: u32 = 125;

/// Local wall-clock format found in older snapshot files
const LEGACY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─────────────────────────────────────────────────────────────────
// Task Status
// ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a task on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Record exists, runner not yet iterating
    Created,
    /// Runner is probing the worker
    Running,
    /// Stop requested by the caller
    Stop,
    /// Budget exhausted and finish notice acknowledged
    Completed,
    /// Finish notice not acknowledged
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Created
    }
}

impl TaskStatus {
    /// Whether the status can no longer change through the runner
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stop | TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Running => "running",
            TaskStatus::Stop => "stop",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// New Task
// ─────────────────────────────────────────────────────────────────

/// Caller-supplied fields of a task being created
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_name: String,
    pub task_type: Option<String>,
    pub task_type_name: String,
    pub task_priority: String,
    /// Worker address the runner is bound to
    pub task_destination: Option<String>,
    /// Probe budget recorded on the task
    pub task_total: u32,
}

// ─────────────────────────────────────────────────────────────────
// Task Record
// ─────────────────────────────────────────────────────────────────

/// One task-on-node execution, as observed by callers and persisted in snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub task_id: String,

    #[serde(default, alias = "task_node")]
    pub node_id: String,

    #[serde(default)]
    pub task_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    #[serde(default)]
    pub task_type_name: String,

    /// Passed through to the worker, never interpreted here
    #[serde(default)]
    pub task_priority: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_destination: Option<String>,

    #[serde(default)]
    pub task_status: TaskStatus,

    /// Index of the last acknowledged probe
    #[serde(default)]
    pub task_progress: u32,

    /// Probe budget the progress is measured against
    #[serde(default = "default_step_budget")]
    pub task_total: u32,

    #[serde(
        default,
        alias = "creat_time",
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_start_time: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_end_time: Option<DateTime<Utc>>,

    /// Keys this version does not know, written back unchanged
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_step_budget() -> u32 {
    DEFAULT_STEP_BUDGET
}

/// Parse an RFC 3339 timestamp, or the legacy `YYYY-MM-DD HH:MM:SS` form read as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|value| {
        parse_timestamp(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{}'", value)))
    })
    .transpose()
}

impl TaskRecord {
    /// Create a fresh record in `created`
    pub fn new(task_id: impl Into<String>, node_id: impl Into<String>, task: NewTask) -> Self {
        Self {
            task_id: task_id.into(),
            node_id: node_id.into(),
            task_name: task.task_name,
            task_type: task.task_type,
            task_type_name: task.task_type_name,
            task_priority: task.task_priority,
            task_destination: task.task_destination,
            task_status: TaskStatus::Created,
            task_progress: 0,
            task_total: if task.task_total == 0 {
                DEFAULT_STEP_BUDGET
            } else {
                task.task_total
            },
            created_at: Some(Utc::now()),
            task_start_time: None,
            task_end_time: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Progress as a percentage of the budget
    pub fn progress_percent(&self) -> f64 {
        if self.task_total == 0 {
            return 0.0;
        }
        f64::from(self.task_progress) / f64::from(self.task_total) * 100.0
    }

    /// Apply a status change, stamping start/end times
    pub(crate) fn apply_status(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Running => {
                if self.task_start_time.is_none() {
                    self.task_start_time = Some(Utc::now());
                }
            }
            TaskStatus::Stop | TaskStatus::Completed | TaskStatus::Failed => {
                self.task_end_time = Some(Utc::now());
            }
            TaskStatus::Created => {}
        }
        self.task_status = status;
    }

    /// Raise progress to `index`, never lowering it
    pub(crate) fn advance_progress(&mut self, index: u32, total: u32) {
        if total > 0 {
            self.task_total = total;
        }
        let bounded = index.min(self.task_total.saturating_sub(1));
        if bounded > self.task_progress {
            self.task_progress = bounded;
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
