//! Mount and unmount failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for mount operations.
pub type MountResult<T> = Result<T, MountError>;

/// Errors raised while attaching or detaching a filesystem.
#[derive(Debug, Error)]
pub enum MountError {
    /// The FUSE device could not be opened.
    #[error("Failed to open {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mount(2) call was rejected.
    #[error("Mount of {mountpoint} failed: {source}")]
    MountSyscall {
        mountpoint: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mount helper binary is nowhere to be found.
    #[error("{name} not found in PATH or {fallback}")]
    HelperNotFound { name: String, fallback: PathBuf },

    /// The helper could not be started.
    #[error("Failed to run {helper}: {source}")]
    HelperSpawn {
        helper: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The helper ran and reported failure.
    #[error("{0}")]
    HelperFailed(String),

    /// The helper did not hand back a usable descriptor.
    #[error("Descriptor hand-off failed: {0}")]
    Handoff(String),

    /// The mountpoint is missing or not a directory.
    #[error("Invalid mountpoint {path}: {reason}")]
    InvalidMountpoint { path: PathBuf, reason: String },

    /// I/O error outside the cases above.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helper_failed_is_verbatim() {
        let err = MountError::HelperFailed("entry not found (code 1)".to_string());
        assert_eq!(err.to_string(), "entry not found (code 1)");
    }

    #[test]
    fn test_helper_not_found_names_fallback() {
        let err = MountError::HelperNotFound {
            name: "fusermount".to_string(),
            fallback: PathBuf::from("/bin"),
        };
        assert!(err.to_string().contains("fusermount"));
        assert!(err.to_string().contains("/bin"));
    }
}
