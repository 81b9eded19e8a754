//! Session failures.

use std::io;

use thiserror::Error;

use super::SessionState;
use crate::config::ConfigError;
use crate::fs::FsError;
use crate::mount::MountError;
use crate::wire::abi;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that end or prevent a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The filesystem could not be attached.
    #[error("Mount failed: {0}")]
    Mount(#[from] MountError),

    /// The unmount helper failed. The descriptor is closed regardless.
    #[error("Unmount failed: {0}")]
    Unmount(#[source] MountError),

    /// INIT negotiation did not complete.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// The kernel speaks a protocol version older than we accept.
    #[error(
        "Kernel protocol {major}.{minor} is not supported (need {}.{} or newer)",
        abi::KERNEL_VERSION,
        abi::MIN_KERNEL_MINOR_VERSION
    )]
    UnsupportedProtocol { major: u32, minor: u32 },

    /// The filesystem's own init hook failed.
    #[error("Filesystem init failed: {0}")]
    FilesystemInit(#[source] FsError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Session is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    /// Unexpected descriptor I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
