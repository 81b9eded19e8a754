//! Tracing subscriber setup.
//!
//! Logs go to stderr, and additionally to a file when one is configured.
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level (`debug` when forced from the command line).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps the file writer flushing until dropped.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Filter directive to use, highest precedence first: `RUST_LOG`, the debug
/// switch, the configured level.
pub fn filter_directive(level: &str, debug: bool, env: Option<String>) -> String {
    match env {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ if debug => "debug".to_string(),
        _ => level.to_string(),
    }
}

/// Install the global subscriber.
pub fn init_logging(settings: &LoggingSettings, debug: bool) -> Result<LoggingGuard, LoggingError> {
    let directive = filter_directive(
        &settings.level,
        debug,
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );
    let filter = EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.clone(),
        message: e.to_string(),
    })?;

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(offset, Rfc3339);

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(timer.clone())
        .with_target(false);

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_timer(timer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard { _file: guard })
}

fn open_log_file(path: &Path) -> Result<fs::File, LoggingError> {
    let fail = |source| LoggingError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(fail)
}
