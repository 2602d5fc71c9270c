//! Configuration system for the task supervisor
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TASK_SUPERVISOR_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::supervisor::RunnerConfig;

/// Main supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Polling loop settings
    pub supervisor: LoopSettings,

    /// Outbound worker request settings
    pub worker: WorkerSettings,

    /// Node directory service settings
    pub directory: DirectorySettings,

    /// Snapshot persistence
    pub storage: StorageSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Polling loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Number of probes per task (each step is 100/step_budget percent)
    pub step_budget: u32,

    /// Lower bound of the randomized delay between probes (ms)
    pub step_delay_min_ms: u64,

    /// Upper bound of the randomized delay between probes (ms)
    pub step_delay_max_ms: u64,

    /// Resolve the record to `failed` when the finish notice is not acknowledged
    pub fail_on_finish_error: bool,

    /// How often `submit` refreshes the status line (ms)
    pub follow_interval_ms: u64,
}

/// Outbound worker request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Timeout for a single probe or finish request (ms)
    pub request_timeout_ms: u64,

    /// Scheme used when a worker address carries none (http or https)
    pub scheme: String,
}

/// Node directory service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Base URL of the directory service
    pub url: String,

    /// Request timeout (ms)
    pub timeout_ms: u64,
}

/// Snapshot persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the JSON task snapshot
    pub snapshot_path: String,

    /// Write the snapshot on task lifecycle changes
    pub persist: bool,

    /// Minimum spacing of progress writes while a task runs (ms)
    pub progress_interval_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// File rotation period: daily, hourly or never
    pub rotation: String,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            supervisor: LoopSettings::default(),
            worker: WorkerSettings::default(),
            directory: DirectorySettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            step_budget: 125,
            step_delay_min_ms: 3000,
            step_delay_max_ms: 5000,
            fail_on_finish_error: true,
            follow_interval_ms: 1000,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            scheme: "http".to_string(),
        }
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            snapshot_path: "~/.task-supervisor/tasks.json".to_string(),
            persist: true,
            progress_interval_ms: 1000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            rotation: "daily".to_string(),
            max_files: 5,
            json_format: false,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: format!("{}: {}", path.display(), e.message()),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::config_not_found(path));
        }

        let search_paths = [
            PathBuf::from("task-supervisor.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("task-supervisor").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".task-supervisor").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/task-supervisor/config.toml"),
        ];

        for path in &search_paths {
            if path.is_file() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Loop settings
        if let Some(n) = env_parse("TASK_SUPERVISOR_STEP_BUDGET") {
            self.supervisor.step_budget = n;
        }
        if let Some(n) = env_parse("TASK_SUPERVISOR_STEP_DELAY_MIN_MS") {
            self.supervisor.step_delay_min_ms = n;
        }
        if let Some(n) = env_parse("TASK_SUPERVISOR_STEP_DELAY_MAX_MS") {
            self.supervisor.step_delay_max_ms = n;
        }
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_FAIL_ON_FINISH_ERROR") {
            self.supervisor.fail_on_finish_error = parse_bool(&val);
        }
        if let Some(n) = env_parse("TASK_SUPERVISOR_FOLLOW_INTERVAL_MS") {
            self.supervisor.follow_interval_ms = n;
        }

        // Worker settings
        if let Some(n) = env_parse("TASK_SUPERVISOR_REQUEST_TIMEOUT_MS") {
            self.worker.request_timeout_ms = n;
        }
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_WORKER_SCHEME") {
            self.worker.scheme = val;
        }

        // Directory settings
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_DIRECTORY_URL") {
            self.directory.url = val;
        }

        // Storage settings
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_SNAPSHOT_PATH") {
            self.storage.snapshot_path = val;
        }
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_PERSIST") {
            self.storage.persist = parse_bool(&val);
        }
        if let Some(n) = env_parse("TASK_SUPERVISOR_PROGRESS_INTERVAL_MS") {
            self.storage.progress_interval_ms = n;
        }

        // Logging settings
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TASK_SUPERVISOR_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.storage.snapshot_path = expand_path(&self.storage.snapshot_path);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.step_budget == 0 {
            return Err(Error::config_field_invalid(
                "supervisor.step_budget",
                "step_budget must be at least 1",
            ));
        }
        if self.supervisor.step_delay_min_ms > self.supervisor.step_delay_max_ms {
            return Err(Error::config_field_invalid(
                "supervisor.step_delay_min_ms",
                format!(
                    "step_delay_min_ms ({}) must not exceed step_delay_max_ms ({})",
                    self.supervisor.step_delay_min_ms, self.supervisor.step_delay_max_ms
                ),
            ));
        }

        if self.supervisor.follow_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "supervisor.follow_interval_ms",
                "follow_interval_ms must be at least 1",
            ));
        }

        if self.worker.request_timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "worker.request_timeout_ms",
                "request_timeout_ms must be at least 1",
            ));
        }

        let scheme = self.worker.scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(Error::config_field_invalid(
                "worker.scheme",
                format!("Unsupported worker scheme '{}'. Must be http or https", self.worker.scheme),
            ));
        }

        if !self.directory.url.starts_with("http://") && !self.directory.url.starts_with("https://") {
            return Err(Error::config_field_invalid(
                "directory.url",
                "Directory URL must start with http:// or https://",
            ));
        }

        if self.directory.timeout_ms == 0 {
            return Err(Error::config_field_invalid(
                "directory.timeout_ms",
                "timeout_ms must be at least 1",
            ));
        }

        if self.storage.snapshot_path.trim().is_empty() {
            return Err(Error::config_field_invalid(
                "storage.snapshot_path",
                "snapshot_path cannot be empty",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.logging.rotation.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.rotation",
                format!(
                    "Invalid log rotation '{}'. Must be one of: {}",
                    self.logging.rotation,
                    valid_rotations.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Runner settings derived from the `[supervisor]` section
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            step_budget: self.supervisor.step_budget,
            step_delay_min: Duration::from_millis(self.supervisor.step_delay_min_ms),
            step_delay_max: Duration::from_millis(self.supervisor.step_delay_max_ms),
            fail_on_finish_error: self.supervisor.fail_on_finish_error,
            progress_interval: Duration::from_millis(self.storage.progress_interval_ms),
        }
    }

    /// Get the snapshot path as a PathBuf
    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.snapshot_path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|val| val.parse().ok())
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".task-supervisor")
                .join("config.toml")
        });

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# Task Supervisor Configuration

[supervisor]
# Number of probes sent to the worker per task
step_budget = 125

# Randomized delay between probes, in milliseconds
step_delay_min_ms = 3000
step_delay_max_ms = 5000

# Mark the task failed when the worker does not acknowledge the finish notice
fail_on_finish_error = true

# Status refresh interval of the submit command, in milliseconds
follow_interval_ms = 1000

[worker]
# Timeout for each probe / finish request, in milliseconds
request_timeout_ms = 10000

# Scheme used for worker addresses given as host:port
scheme = "http"

[directory]
# Node directory service base URL
url = "http://127.0.0.1:8000"
timeout_ms = 10000

[storage]
# JSON snapshot of all known tasks
snapshot_path = "~/.task-supervisor/tasks.json"

# Persist the snapshot on create, stop and completion
persist = true

# Progress of running tasks is written at most this often, in milliseconds
progress_interval_ms = 1000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.task-supervisor/logs/supervisor.log"

# Start a new log file daily, hourly or never
rotation = "daily"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.supervisor.step_budget, 125);
        assert_eq!(config.supervisor.step_delay_min_ms, 3000);
        assert_eq!(config.supervisor.step_delay_max_ms, 5000);
        assert!(config.supervisor.fail_on_finish_error);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override() {
        env::set_var("TASK_SUPERVISOR_STEP_BUDGET", "10");
        env::set_var("TASK_SUPERVISOR_DIRECTORY_URL", "http://dir.example.com");
        env::set_var("TASK_SUPERVISOR_FAIL_ON_FINISH_ERROR", "false");

        let mut config = SupervisorConfig::default();
        config.apply_env_overrides();

        assert_eq!(config.supervisor.step_budget, 10);
        assert_eq!(config.directory.url, "http://dir.example.com");
        assert!(!config.supervisor.fail_on_finish_error);

        env::remove_var("TASK_SUPERVISOR_STEP_BUDGET");
        env::remove_var("TASK_SUPERVISOR_DIRECTORY_URL");
        env::remove_var("TASK_SUPERVISOR_FAIL_ON_FINISH_ERROR");
    }

    #[test]
    fn test_validation_zero_budget() {
        let mut config = SupervisorConfig::default();
        config.supervisor.step_budget = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_inverted_delay() {
        let mut config = SupervisorConfig::default();
        config.supervisor.step_delay_min_ms = 6000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("step_delay_min_ms"));
    }

    #[test]
    fn test_validation_zero_timeouts() {
        let mut config = SupervisorConfig::default();
        config.worker.request_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_ms"));

        let mut config = SupervisorConfig::default();
        config.directory.timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));

        let mut config = SupervisorConfig::default();
        config.supervisor.follow_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_scheme() {
        let mut config = SupervisorConfig::default();
        config.worker.scheme = "ftp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_directory_url() {
        let mut config = SupervisorConfig::default();
        config.directory.url = "34.130.234.56".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = SupervisorConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_rotation() {
        let mut config = SupervisorConfig::default();
        config.logging.rotation = "weekly".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rotation"));
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(SupervisorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = SupervisorConfig::default();
        config.expand_paths();
        assert!(!config.storage.snapshot_path.contains('~'));
    }

    #[test]
    fn test_runner_config() {
        let mut config = SupervisorConfig::default();
        config.supervisor.step_delay_min_ms = 10;
        config.supervisor.step_delay_max_ms = 20;

        let runner = config.runner_config();
        assert_eq!(runner.step_budget, 125);
        assert_eq!(runner.step_delay_min, Duration::from_millis(10));
        assert_eq!(runner.step_delay_max, Duration::from_millis(20));
        assert_eq!(runner.progress_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_template_parses() {
        let parsed: SupervisorConfig = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed.supervisor.step_budget, 125);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_parse_config_file() {
        let config_str = r#"
[supervisor]
step_budget = 20
step_delay_min_ms = 100
step_delay_max_ms = 200

[worker]
request_timeout_ms = 2500

[storage]
snapshot_path = "/var/lib/task-supervisor/tasks.json"
persist = false

[logging]
level = "debug"
"#;

        let config: SupervisorConfig = toml::from_str(config_str).unwrap();

        assert_eq!(config.supervisor.step_budget, 20);
        assert_eq!(config.supervisor.step_delay_min_ms, 100);
        assert_eq!(config.worker.request_timeout_ms, 2500);
        assert_eq!(config.worker.scheme, "http");
        assert!(!config.storage.persist);
        assert_eq!(config.logging.level, "debug");
    }
}
