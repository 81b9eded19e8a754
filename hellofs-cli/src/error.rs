//! CLI error type.

use std::io;

use hellofs::config::ConfigError;
use hellofs::logging::LoggingError;
use hellofs::session::SessionError;
use thiserror::Error;

/// Everything a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad configuration or arguments.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read or written.
    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    /// Mounting or serving failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Print the error and hints to stderr, then exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        if let Some(hint) = self.hint() {
            eprintln!();
            eprintln!("{}", hint);
        }
        std::process::exit(1);
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            CliError::Session(SessionError::Mount(_)) => Some(
                "Check that /dev/fuse exists, the mountpoint is an empty directory, \
                 and fusermount3 (or fusermount) is installed.",
            ),
            CliError::ConfigFile(_) => {
                Some("Run 'hellofs init' to write a fresh configuration file.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_message() {
        let err = CliError::Config("missing mountpoint".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing mountpoint");
        assert!(err.source().is_none());
        assert!(err.hint().is_none());
    }

    #[test]
    fn test_session_error_passes_through() {
        let err: CliError = SessionError::UnsupportedProtocol { major: 7, minor: 8 }.into();
        assert_eq!(
            err.to_string(),
            "Kernel protocol 7.8 is not supported (need 7.12 or newer)"
        );
        assert!(err.hint().is_none());
    }

    #[test]
    fn test_io_keeps_source() {
        let err: CliError = io::Error::other("boom").into();
        assert_eq!(err.to_string(), "I/O error: boom");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_file_hint() {
        let err: CliError = ConfigError::Invalid("max_write too small".to_string()).into();
        assert!(err.hint().unwrap().contains("hellofs init"));
    }
}
