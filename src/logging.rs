//! Logging setup on tracing-subscriber
//!
//! Log lines go to stderr so stdout stays clean for command output. An
//! optional file sink rotates through `tracing-appender` and is written from
//! a background thread; `LogGuards` flushes it on drop.

use std::fs;
use std::path::Path;

use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Keeps the file writer alive; drop it last
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `settings` and the CLI flags
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = determine_level(settings, verbose, quiet);

    let (file_layer, file_guard) = match settings.file.as_deref() {
        Some(path) => {
            let (writer, guard) = file_writer(path, &settings.rotation, settings.max_files)?;
            (Some(format_layer(writer, settings.json_format, false, true)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_env_filter(level)?)
        .with(format_layer(std::io::stderr, settings.json_format, true, false))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %level,
        file = ?settings.file,
        rotation = %settings.rotation,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// Stderr-only logging for commands that run before a config is loaded
pub fn init_console(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_env_filter(level)?)
        .with(format_layer(std::io::stderr, false, true, false))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn determine_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => parse_level(&settings.level),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid log directive '{}': {}", raw, e)))
}

/// `RUST_LOG` when set, else `level`; the HTTP stack stays at warn either way
fn build_env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.to_string().to_lowercase();

    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(directive(&format!("task_supervisor={}", base))?)
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?))
}

/// One fmt layer for any writer. `detailed` adds thread ids and source
/// locations, which only the file sink carries in plain-text mode.
fn format_layer<S, W>(writer: W, json: bool, ansi: bool, detailed: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(ansi && !json);

    if json {
        Box::new(
            layer
                .json()
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        )
    } else if detailed {
        Box::new(
            layer
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
    } else {
        Box::new(layer.compact())
    }
}

fn file_writer(log_file: &str, rotation: &str, max_files: u32) -> Result<(NonBlocking, WorkerGuard)> {
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|e| {
        Error::Config(format!(
            "Failed to create log directory '{}': {}",
            directory.display(),
            e
        ))
    })?;

    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("supervisor");

    let appender = RollingFileAppender::builder()
        .rotation(parse_rotation(rotation))
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Config(format!("Failed to create log file appender: {}", e)))?;

    Ok(tracing_appender::non_blocking(appender))
}
