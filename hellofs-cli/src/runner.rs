//! Shared setup for commands that serve a filesystem.

use std::path::{Path, PathBuf};

use hellofs::config::{config_file_path, ConfigFile};
use hellofs::logging::{init_logging, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Loaded configuration plus the installed logger.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Load `config_path` (or the default file) and start logging.
    pub fn new(config_path: Option<&Path>, debug: bool) -> Result<Self, CliError> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&config_path)?;
        let logging = init_logging(&config.logging, debug)?;
        Ok(Self {
            config,
            config_path,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = hellofs::VERSION,
            config = %self.config_path.display(),
            "hellofs starting"
        );
    }
}
