//! Kernel message transport.
//!
//! A [`KernelChannel`] moves whole messages: every `receive` yields exactly
//! one request frame and every `send` writes one reply in a single call, so
//! frames never tear or interleave.
//!
//! - [`DeviceChannel`] - the `/dev/fuse` descriptor produced by a mount
//! - [`MemoryChannel`] - an in-process pair driven by a [`MemoryKernel`],
//!   used by tests and by embedders that speak the protocol themselves
//!
//! Both report an unmounted kernel side as `ENODEV`.

mod device;
mod memory;

use std::future::Future;
use std::io;
use std::pin::Pin;

use bytes::Bytes;

pub use device::DeviceChannel;
pub use memory::{memory_channel, MemoryChannel, MemoryKernel};

/// Boxed future returned by [`KernelChannel`] methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// Bidirectional message transport to the kernel.
pub trait KernelChannel: Send + Sync + 'static {
    /// Wait for the next request frame.
    ///
    /// An empty frame or an `ENODEV` error means the filesystem was unmounted.
    fn receive(&self) -> ChannelFuture<'_, Bytes>;

    /// Write one encoded reply.
    fn send(&self, frame: Bytes) -> ChannelFuture<'_, ()>;
}

/// Whether a transport error means the kernel side has gone away.
pub fn is_disconnect(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENODEV)
}

/// Whether a receive error is transient and the read should be retried.
pub fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::ENOENT)
    ) || err.kind() == io::ErrorKind::Interrupted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(is_disconnect(&io::Error::from_raw_os_error(libc::ENODEV)));
        assert!(!is_disconnect(&io::Error::from_raw_os_error(libc::EIO)));
        assert!(is_retryable(&io::Error::from_raw_os_error(libc::EINTR)));
        assert!(is_retryable(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(is_retryable(&io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(!is_retryable(&io::Error::from_raw_os_error(libc::EIO)));
    }
}
