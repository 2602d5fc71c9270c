//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the task supervisor.

use clap::{Parser, Subcommand};

/// Task Supervisor - drive long-running tasks on remote worker nodes
///
/// Creates tasks bound to a worker, probes the worker step by step,
/// and reports progress and final status.
#[derive(Parser, Debug)]
#[command(name = "task-supervisor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a task on a worker and follow it until it ends (Ctrl+C stops it)
    Submit {
        /// Task type name forwarded to the worker
        task_type_name: String,

        /// Unique task identifier
        task_id: String,

        /// Worker node identifier
        node_id: String,

        /// Human-readable task name
        task_name: String,

        /// Opaque priority label
        priority: String,

        /// Worker address (host:port or base URL)
        #[arg(short, long, env = "TASK_SUPERVISOR_WORKER")]
        worker: String,

        /// Optional task type tag
        #[arg(long)]
        task_type: Option<String>,

        /// Path to configuration file
        #[arg(short, long, env = "TASK_SUPERVISOR_CONFIG")]
        config: Option<String>,
    },

    /// Print the persisted records of a task as JSON
    Status {
        /// Task identifier
        task_id: String,

        /// Path to configuration file
        #[arg(short, long, env = "TASK_SUPERVISOR_CONFIG")]
        config: Option<String>,
    },

    /// Register a node token with the directory service
    Register {
        token: String,

        /// Path to configuration file
        #[arg(short, long, env = "TASK_SUPERVISOR_CONFIG")]
        config: Option<String>,
    },

    /// Remove a node token from the directory service
    Unregister {
        token: String,

        /// Path to configuration file
        #[arg(short, long, env = "TASK_SUPERVISOR_CONFIG")]
        config: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
