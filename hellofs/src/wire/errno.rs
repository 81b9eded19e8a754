//! Kernel error codes carried in reply headers.

use std::fmt;

/// A positive errno value.
///
/// The reply header carries the negated value; [`Errno::to_wire`] and
/// [`Errno::from_wire`] do the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    pub const EPERM: Errno = Errno(libc::EPERM);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EINTR: Errno = Errno(libc::EINTR);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const EAGAIN: Errno = Errno(libc::EAGAIN);
    pub const EACCES: Errno = Errno(libc::EACCES);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const EROFS: Errno = Errno(libc::EROFS);
    pub const ERANGE: Errno = Errno(libc::ERANGE);
    pub const ENOSYS: Errno = Errno(libc::ENOSYS);
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    pub const EPROTO: Errno = Errno(libc::EPROTO);
    pub const ESTALE: Errno = Errno(libc::ESTALE);

    /// Wrap a raw errno. Non-positive values collapse to `EIO`.
    pub fn new(code: i32) -> Self {
        if code > 0 {
            Errno(code)
        } else {
            Errno::EIO
        }
    }

    pub fn code(self) -> i32 {
        self.0
    }

    /// Value for the reply header's `error` field.
    pub fn to_wire(self) -> i32 {
        -self.0
    }

    /// Parse a reply header's `error` field. Zero means success.
    pub fn from_wire(error: i32) -> Option<Self> {
        if error == 0 {
            None
        } else {
            Some(Errno::new(error.saturating_neg()))
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        err.raw_os_error().map(Errno::new).unwrap_or(Errno::EIO)
    }
}
