//! Task Supervisor - drive long-running tasks on remote worker nodes
//!
//! This is the main entry point for the task-supervisor binary.
//! It creates tasks bound to a worker, follows their progress, and
//! exposes the persisted task records and the directory pass-through.

mod cli;
mod config;
mod directory;
mod error;
mod logging;
mod snapshot;
mod supervisor;
mod version;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::config::SupervisorConfig;
use crate::directory::DirectoryClient;
use crate::error::{Error, Result};
use crate::snapshot::{NodeRecords, SnapshotStore};
use crate::supervisor::{CreateTaskRequest, Supervisor, TaskRegistry, TaskStatus};
use crate::worker::HttpWorkerClient;

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    }
}

/// Dispatch a command; returns the process exit code
fn run(cli: Cli) -> Result<i32> {
    let config_path = match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(0);
        }
        Commands::Config { subcommand } => {
            logging::init_console(tracing::Level::WARN)?;
            handle_config_command(subcommand.clone())?;
            return Ok(0);
        }
        Commands::Submit { config, .. }
        | Commands::Status { config, .. }
        | Commands::Register { config, .. }
        | Commands::Unregister { config, .. } => config.clone(),
    };

    let config = SupervisorConfig::load(config_path.as_deref())?;

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(
        version = %version::BUILD.full_version(),
        target = %version::BUILD.target,
        "Starting task-supervisor"
    );

    match cli.command {
        Commands::Submit {
            task_type_name,
            task_id,
            node_id,
            task_name,
            priority,
            worker,
            task_type,
            ..
        } => {
            let request = CreateTaskRequest {
                task_type_name,
                task_id,
                node_id,
                task_name,
                priority,
                worker_address: worker,
                task_type,
            };
            let runtime = build_runtime()?;
            runtime.block_on(submit_and_follow(config, request))
        }
        Commands::Status { task_id, .. } => {
            print_status(&config, &task_id)?;
            Ok(0)
        }
        Commands::Register { token, .. } => {
            let runtime = build_runtime()?;
            let body = runtime.block_on(async {
                DirectoryClient::new(&config.directory)?.register(&token).await
            })?;
            println!("{}", body);
            Ok(0)
        }
        Commands::Unregister { token, .. } => {
            let runtime = build_runtime()?;
            let body = runtime.block_on(async {
                DirectoryClient::new(&config.directory)?.unregister(&token).await
            })?;
            println!("{}", body);
            Ok(0)
        }
        Commands::Version | Commands::Config { .. } => {
            // Already handled above
            unreachable!();
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(num_cpus::get().clamp(1, 4))
        .thread_name("task-supervisor")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

// ─────────────────────────────────────────────────────────────────
// Submit
// ─────────────────────────────────────────────────────────────────

/// Create a task and print its progress until every node is terminal.
///
/// Ctrl+C stops the task and waits for the runner to send its finish notice.
async fn submit_and_follow(config: SupervisorConfig, request: CreateTaskRequest) -> Result<i32> {
    let client = HttpWorkerClient::new(Duration::from_millis(config.worker.request_timeout_ms))?;
    let store = Arc::new(SnapshotStore::new(config.snapshot_path()));

    let mut supervisor = Supervisor::new(config.runner_config(), config.worker.scheme.clone(), Arc::new(client));
    if config.storage.persist {
        supervisor = supervisor.with_snapshot_store(store.clone());
    }
    supervisor.merge_snapshot(&store);

    let task_id = request.task_id.clone();
    let record = supervisor.create_task(request).await?;
    println!(
        "Task {} created on node {} ({})",
        record.task_id,
        record.node_id,
        record.task_destination.as_deref().unwrap_or("-")
    );

    let wait = supervisor.wait_for(&task_id);
    tokio::pin!(wait);

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);
    let mut stopping = false;

    let mut ticker = tokio::time::interval(Duration::from_millis(config.supervisor.follow_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_seen = None;

    let records = loop {
        tokio::select! {
            records = &mut wait => break records?,

            _ = &mut shutdown_signal, if !stopping => {
                info!(task_id = %task_id, "Interrupt received, stopping task");
                stopping = true;
                supervisor.stop_task(&task_id).await?;
            }

            _ = ticker.tick() => {
                if let Ok(nodes) = supervisor.get_status(&task_id) {
                    for record in nodes.values() {
                        let seen = (record.task_status, record.task_progress);
                        if last_seen != Some(seen) {
                            last_seen = Some(seen);
                            println!(
                                "[{}] {}/{} {:>5.1}%",
                                record.task_status,
                                record.task_progress,
                                record.task_total,
                                record.progress_percent()
                            );
                        }
                    }
                }
            }
        }
    };

    supervisor.shutdown().await;
    Ok(report_outcome(&task_id, &records))
}

fn report_outcome(task_id: &str, records: &NodeRecords) -> i32 {
    let mut code = 0;
    for record in records.values() {
        println!(
            "Task {} on node {} finished: {} ({}/{})",
            task_id, record.node_id, record.task_status, record.task_progress, record.task_total
        );
        if record.task_status == TaskStatus::Failed {
            code = 1;
        }
    }
    code
}

// ─────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────

/// Print the persisted node records of a task as JSON
fn print_status(config: &SupervisorConfig, task_id: &str) -> Result<()> {
    let store = SnapshotStore::new(config.snapshot_path());
    let registry = TaskRegistry::new();
    match store.load() {
        Ok(snapshot) => {
            registry.merge_from_snapshot(snapshot);
        }
        Err(e) => warn!(error = %e.format_for_log(), "Ignoring unreadable snapshot"),
    }

    let records = registry.get(task_id)?;
    let json = serde_json::to_string_pretty(&records)
        .map_err(|e| Error::Internal(format!("Failed to encode task records: {}", e)))?;
    println!("{}", json);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = SupervisorConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let created = config::init_config(path.as_deref(), force)?;
            println!("Created configuration file: {}", created.display());
        }
        ConfigSubcommand::Validate { config } => {
            SupervisorConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
