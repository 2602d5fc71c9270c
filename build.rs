//! Build script for task-supervisor
//!
//! Embeds git revision, build timestamp, target and compiler version
//! as `TASK_SUPERVISOR_*` compile-time environment variables.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = run("git", &["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(unknown);
    let git_branch = run("git", &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap_or_else(unknown);
    let git_dirty = match run("git", &["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };
    let rustc_version = run("rustc", &["--version"]).unwrap_or_else(unknown);

    let vars = [
        ("GIT_HASH", git_hash.clone()),
        ("GIT_BRANCH", git_branch),
        ("GIT_DIRTY", git_dirty.to_string()),
        (
            "BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("TARGET", cargo_var("TARGET")),
        ("PROFILE", cargo_var("PROFILE")),
        ("HOST", cargo_var("HOST")),
        ("RUSTC_VERSION", rustc_version),
    ];
    for (key, value) in &vars {
        println!("cargo:rustc-env=TASK_SUPERVISOR_{}={}", key, value);
    }

    eprintln!(
        "Building task-supervisor {} ({}, {})",
        git_hash,
        cargo_var("TARGET"),
        cargo_var("PROFILE")
    );
}

/// Trimmed stdout of a successful command
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn cargo_var(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| unknown())
}

fn unknown() -> String {
    "unknown".to_string()
}
