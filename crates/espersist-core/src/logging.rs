//! Logging infrastructure for espersist
//!
//! Structured logging via the `tracing` ecosystem. Workers and the
//! supervisor log to stderr; a worker's output is captured by the
//! supervisor and re-logged when the worker dies. An optional log file can
//! be configured for long-lived deployments.
//!
//! The configured `syslog_priority` provides the default level filter and
//! can be overridden with `RUST_LOG`.

use crate::error::{Error, Result};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for a daemon process.
///
/// `priority` is the configured default level; `--debug` forces `debug`.
///
/// # Errors
///
/// Returns an error if the level filter cannot be parsed. A subscriber that
/// is already installed (tests) is not an error.
pub fn init_logging(priority: &str, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { priority };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config(format!("Invalid log level '{level}': {e}")))?;

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();

    Ok(())
}

/// Initialize the tracing subscriber with daily-rotated file output.
///
/// # Errors
///
/// Returns an error if the level filter cannot be parsed or the log
/// directory cannot be created.
pub fn init_logging_to_file(priority: &str, debug: bool, file_path: &str) -> Result<()> {
    let level = if debug { "debug" } else { priority };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config(format!("Invalid log level '{level}': {e}")))?;

    let appender = create_file_appender(file_path)?;
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_target(true).with_writer(appender))
        .try_init();

    Ok(())
}

/// Create a daily-rotated file appender
fn create_file_appender(file_path: &str) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let path = Path::new(file_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::config(format!(
                "Failed to create log directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("espersistd.log");
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    Ok(tracing_appender::rolling::daily(dir, file_name))
}

/// Validate a configured log level
pub fn validate_log_level(level: &str) -> Result<()> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(Error::config(format!(
            "Invalid syslog_priority '{level}': must be one of trace, debug, info, warn, error"
        ))),
    }
}
