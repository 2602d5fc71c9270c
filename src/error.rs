//! Error types for the task supervisor
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - User-friendly messages with suggestions
//! - Error context and chaining
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,

    // Remote errors (3xx)
    ConnectionFailed = 300,
    ConnectionTimeout = 301,
    RemoteStatus = 302,
    ProbeFailed = 310,
    FinishFailed = 311,
    DirectoryFailed = 320,

    // Task lifecycle errors (4xx)
    TaskAlreadyExists = 400,
    TaskNotFound = 404,
    InvalidWorkerAddress = 410,

    // Snapshot errors (5xx)
    SnapshotLoad = 500,
    SnapshotWrite = 501,

    // Internal errors (9xx)
    InternalError = 900,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Remote errors
            400..=499 => 40, // Task errors
            500..=599 => 50, // Snapshot errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for the supervisor
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    // ─────────────────────────────────────────────────────────────
    // Remote Errors
    // ─────────────────────────────────────────────────────────────

    /// Transport-level failure talking to a remote node
    #[error("Failed to reach {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    /// Request to a remote node timed out
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    ConnectionTimeout { url: String, timeout_ms: u64 },

    /// Remote node answered with a non-success status
    #[error("{url} answered with status {status}")]
    RemoteStatus { url: String, status: u16 },

    /// A single progress probe failed
    #[error("Probe {step} for task {task_id} on node {node_id} failed: {message}")]
    ProbeFailed {
        task_id: String,
        node_id: String,
        step: u32,
        message: String,
    },

    /// The worker did not acknowledge the finish notice
    #[error("Finish notice for task {task_id} on node {node_id} failed: {message}")]
    FinishFailed {
        task_id: String,
        node_id: String,
        message: String,
    },

    /// Directory service call failed
    #[error("Directory service {operation} failed: {message}")]
    DirectoryFailed { operation: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Task Lifecycle Errors
    // ─────────────────────────────────────────────────────────────

    /// Task id collision on create
    #[error("Task {task_id} already exists")]
    TaskAlreadyExists { task_id: String },

    /// Unknown task id
    #[error("Task {task_id} does not exist")]
    TaskNotFound { task_id: String },

    /// Worker address could not be turned into a URL
    #[error("Invalid worker address '{address}': {message}")]
    InvalidWorkerAddress { address: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Snapshot Errors
    // ─────────────────────────────────────────────────────────────

    /// Persisted snapshot unreadable or corrupt
    #[error("Failed to load task snapshot {path}: {message}")]
    SnapshotLoad { path: PathBuf, message: String },

    /// Persisted snapshot could not be written
    #[error("Failed to write task snapshot {path}: {message}")]
    SnapshotWrite { path: PathBuf, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,

            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Toml(_) => ErrorCode::ConfigParseError,

            Error::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Error::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Error::RemoteStatus { .. } => ErrorCode::RemoteStatus,
            Error::ProbeFailed { .. } => ErrorCode::ProbeFailed,
            Error::FinishFailed { .. } => ErrorCode::FinishFailed,
            Error::DirectoryFailed { .. } => ErrorCode::DirectoryFailed,

            Error::TaskAlreadyExists { .. } => ErrorCode::TaskAlreadyExists,
            Error::TaskNotFound { .. } => ErrorCode::TaskNotFound,
            Error::InvalidWorkerAddress { .. } => ErrorCode::InvalidWorkerAddress,

            Error::SnapshotLoad { .. } => ErrorCode::SnapshotLoad,
            Error::SnapshotWrite { .. } => ErrorCode::SnapshotWrite,

            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is transient (a later attempt may succeed)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::RemoteStatus { .. }
                | Error::ProbeFailed { .. }
                | Error::DirectoryFailed { .. }
                | Error::IoRead { .. }
                | Error::IoWrite { .. }
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'task-supervisor config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'task-supervisor config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),

            Error::ConnectionFailed { .. } | Error::ConnectionTimeout { .. } => Some(
                "Check that the remote node is running and reachable from this host."
            ),
            Error::DirectoryFailed { .. } => Some(
                "Verify the directory service URL in the [directory] section of the configuration."
            ),

            Error::TaskAlreadyExists { .. } => Some(
                "Task ids must be unique. Pick a new id or query the existing task with 'task-supervisor status'."
            ),
            Error::TaskNotFound { .. } => Some(
                "Check the task id. Only tasks created by this supervisor or present in the snapshot are known."
            ),
            Error::InvalidWorkerAddress { .. } => Some(
                "Pass the worker as host:port (e.g. 10.0.0.5:9000) or as a full http:// URL."
            ),

            Error::SnapshotLoad { .. } => Some(
                "The snapshot file may be corrupted. Move it aside to start with an empty registry."
            ),
            Error::SnapshotWrite { .. } => Some(
                "Check permissions on the directory configured as storage.snapshot_path."
            ),

            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let suggestion = self.suggestion();

        let mut output = format!(
            "\x1b[31mError [{}]\x1b[0m: {}\n",
            code.as_str(),
            self
        );

        if let Some(hint) = suggestion {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        let code = self.code();
        format!("[{}] {}", code.as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigNotFound { path: path.into() }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a task already exists error
    pub fn task_exists(task_id: impl Into<String>) -> Self {
        Error::TaskAlreadyExists {
            task_id: task_id.into(),
        }
    }

    /// Create a task not found error
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Error::TaskNotFound {
            task_id: task_id.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
