//! Typed failures returned by filesystem handlers.

use std::io;

use thiserror::Error;

use crate::wire::Errno;

/// Result type for filesystem handlers.
pub type FsResult<T> = Result<T, FsError>;

/// Errors a [`Filesystem`](super::Filesystem) implementation can report.
///
/// Each variant maps 1:1 onto a kernel errno; none of them end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("file exists")]
    AlreadyExists,

    #[error("directory not empty")]
    NotEmpty,

    #[error("read-only filesystem")]
    ReadOnly,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("bad file handle")]
    BadHandle,

    #[error("stale node")]
    Stale,

    #[error("operation not implemented")]
    Unsupported,

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error")]
    Io,

    /// Any other errno.
    #[error("errno {0}")]
    Errno(i32),
}

impl FsError {
    /// Kernel error code for this failure.
    pub fn errno(&self) -> Errno {
        match self {
            FsError::NotFound => Errno::ENOENT,
            FsError::PermissionDenied => Errno::EACCES,
            FsError::NotPermitted => Errno::EPERM,
            FsError::NotADirectory => Errno::ENOTDIR,
            FsError::IsADirectory => Errno::EISDIR,
            FsError::AlreadyExists => Errno::EEXIST,
            FsError::NotEmpty => Errno::ENOTEMPTY,
            FsError::ReadOnly => Errno::EROFS,
            FsError::InvalidArgument => Errno::EINVAL,
            FsError::BadHandle => Errno::EBADF,
            FsError::Stale => Errno::ESTALE,
            FsError::Unsupported => Errno::ENOSYS,
            FsError::Interrupted => Errno::EINTR,
            FsError::Io => Errno::EIO,
            FsError::Errno(code) => Errno::new(*code),
        }
    }
}

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        err.errno()
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::InvalidInput => FsError::InvalidArgument,
            io::ErrorKind::Interrupted => FsError::Interrupted,
            _ => match err.raw_os_error() {
                Some(code) => FsError::Errno(code),
                None => FsError::Io,
            },
        }
    }
}
