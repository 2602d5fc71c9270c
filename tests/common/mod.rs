//! Shared fixtures for the binary-level tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

pub fn tasks_fixture() -> PathBuf {
    fixture_path("tasks.json")
}

/// The binary with a snapshot path isolated from the user's home
pub fn supervisor_cmd(snapshot: &Path) -> Command {
    let mut cmd = Command::cargo_bin("task-supervisor").unwrap();
    cmd.env("TASK_SUPERVISOR_SNAPSHOT_PATH", snapshot)
        .env_remove("TASK_SUPERVISOR_CONFIG")
        .env_remove("TASK_SUPERVISOR_WORKER")
        .env_remove("RUST_LOG");
    cmd
}
