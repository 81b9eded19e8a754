//! Configuration.
//!
//! Settings come from three layers, highest precedence first:
//!
//! 1. CLI arguments
//! 2. `~/.hellofs/config.ini`
//! 3. Built-in defaults
//!
//! The file is plain INI:
//!
//! ```ini
//! [mount]
//! fs_name = hellofs
//! allow_other = false
//! fusermount_fallback = true
//! options = ro,noatime
//!
//! [session]
//! max_write = 131072
//! max_readahead = 131072
//! max_background = 12
//! congestion_threshold = 9
//! entry_ttl_ms = 1000
//! attr_ttl_ms = 1000
//! shutdown_grace_secs = 5
//!
//! [logging]
//! level = info
//! file = /tmp/hellofs.log
//! ```

mod file;
mod session;

use std::path::PathBuf;

use thiserror::Error;

pub use file::{ConfigFile, LoggingSettings, MountSettings, SessionSettings};
pub use session::{SessionConfig, DEFAULT_MAX_WRITE, MIN_MAX_WRITE};

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {section}.{key}: '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory holding configuration and default logs (`~/.hellofs`).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hellofs")
}

/// Default configuration file location.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}
