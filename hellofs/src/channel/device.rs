//! `/dev/fuse` descriptor channel.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use bytes::{Bytes, BytesMut};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tracing::trace;

use super::{ChannelFuture, KernelChannel};
use crate::wire::abi;

/// Async wrapper around the kernel descriptor.
///
/// The descriptor is switched to non-blocking mode and registered with the
/// Tokio reactor; dropping the channel closes it. Frames are read into one
/// reused buffer and copied out at their exact length.
#[derive(Debug)]
pub struct DeviceChannel {
    fd: AsyncFd<OwnedFd>,
    scratch: Mutex<BytesMut>,
}

impl DeviceChannel {
    /// Wrap `fd`, sizing the read buffer for writes of up to `max_write` bytes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(fd: OwnedFd, max_write: u32) -> io::Result<Self> {
        set_nonblocking(&fd)?;
        let buffer_size = (max_write as usize + abi::BUFFER_HEADROOM).max(abi::MIN_READ_BUFFER);
        Ok(Self {
            fd: AsyncFd::new(fd)?,
            scratch: Mutex::new(BytesMut::zeroed(buffer_size)),
        })
    }

    fn buffer_size(&self) -> usize {
        self.scratch.lock().len()
    }

    async fn read_frame(&self) -> io::Result<Bytes> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                let mut scratch = self.scratch.lock();
                let n = unistd::read(inner.get_ref().as_raw_fd(), &mut scratch[..])
                    .map_err(io::Error::from)?;
                Ok(Bytes::copy_from_slice(&scratch[..n]))
            });
            match result {
                Ok(Ok(frame)) => {
                    trace!(len = frame.len(), "read frame");
                    return Ok(frame);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_frame(&self, frame: Bytes) -> io::Result<()> {
        loop {
            let mut guard = self.fd.writable().await?;
            let result =
                guard.try_io(|inner| unistd::write(inner.get_ref(), &frame).map_err(io::Error::from));
            match result {
                Ok(Ok(n)) if n == frame.len() => return Ok(()),
                Ok(Ok(n)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short reply write: {} of {} bytes", n, frame.len()),
                    ))
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }
}

impl KernelChannel for DeviceChannel {
    fn receive(&self) -> ChannelFuture<'_, Bytes> {
        Box::pin(self.read_frame())
    }

    fn send(&self, frame: Bytes) -> ChannelFuture<'_, ()> {
        Box::pin(self.write_frame(frame))
    }
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

    fn seqpacket_pair() -> (OwnedFd, OwnedFd) {
        socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_frames_are_preserved() {
        let (a, b) = seqpacket_pair();
        let left = DeviceChannel::new(a, 4096).unwrap();
        let right = DeviceChannel::new(b, 4096).unwrap();

        left.send(Bytes::from_static(b"first")).await.unwrap();
        left.send(Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(&right.receive().await.unwrap()[..], b"first");
        assert_eq!(&right.receive().await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn test_closed_peer_reads_empty() {
        let (a, b) = seqpacket_pair();
        let right = DeviceChannel::new(b, 4096).unwrap();
        drop(a);
        assert!(right.receive().await.unwrap().is_empty());
    }

    #[test]
    fn test_buffer_has_header_room() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let (a, _b) = seqpacket_pair();
        let channel = DeviceChannel::new(a, 128 * 1024).unwrap();
        assert_eq!(channel.buffer_size(), 128 * 1024 + abi::BUFFER_HEADROOM);
    }

    #[tokio::test]
    async fn test_small_frames_are_exact_copies() {
        let (a, b) = seqpacket_pair();
        let left = DeviceChannel::new(a, 128 * 1024).unwrap();
        let right = DeviceChannel::new(b, 128 * 1024).unwrap();
        let scratch_before = right.scratch.lock().as_ptr();

        left.send(Bytes::from(vec![7u8; 40])).await.unwrap();
        left.send(Bytes::from(vec![9u8; 64 * 1024])).await.unwrap();

        let small = right.receive().await.unwrap();
        let large = right.receive().await.unwrap();
        assert_eq!(small.len(), 40);
        assert!(small.iter().all(|&b| b == 7));
        assert_eq!(large.len(), 64 * 1024);
        assert!(large.iter().all(|&b| b == 9));

        // Frames do not point into the read buffer, which is kept and reused.
        let scratch = right.scratch.lock();
        assert_eq!(scratch.as_ptr(), scratch_before);
        assert_eq!(scratch.len(), 128 * 1024 + abi::BUFFER_HEADROOM);
        assert!(!std::ptr::eq(small.as_ptr(), scratch.as_ptr()));
    }
}
