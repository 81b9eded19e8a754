//! In-process channel with a scriptable kernel side.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ChannelFuture, KernelChannel};
use crate::wire::Request;

/// Session side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryChannel {
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    replies: mpsc::UnboundedSender<Bytes>,
    send_errors: Arc<Mutex<VecDeque<i32>>>,
}

/// Kernel side of an in-memory connection.
///
/// Dropping it (or calling [`MemoryKernel::close`]) looks like an unmount to
/// the session: pending and future receives fail with `ENODEV`.
#[derive(Debug)]
pub struct MemoryKernel {
    requests: Option<mpsc::UnboundedSender<Bytes>>,
    replies: mpsc::UnboundedReceiver<Bytes>,
    send_errors: Arc<Mutex<VecDeque<i32>>>,
}

/// Create a connected channel pair.
pub fn memory_channel() -> (MemoryChannel, MemoryKernel) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let send_errors = Arc::new(Mutex::new(VecDeque::new()));
    (
        MemoryChannel {
            requests: tokio::sync::Mutex::new(request_rx),
            replies: reply_tx,
            send_errors: Arc::clone(&send_errors),
        },
        MemoryKernel {
            requests: Some(request_tx),
            replies: reply_rx,
            send_errors,
        },
    )
}

fn enodev() -> io::Error {
    io::Error::from_raw_os_error(libc::ENODEV)
}

impl KernelChannel for MemoryChannel {
    fn receive(&self) -> ChannelFuture<'_, Bytes> {
        Box::pin(async move {
            let mut requests = self.requests.lock().await;
            requests.recv().await.ok_or_else(enodev)
        })
    }

    fn send(&self, frame: Bytes) -> ChannelFuture<'_, ()> {
        Box::pin(async move {
            if let Some(code) = self.send_errors.lock().pop_front() {
                return Err(io::Error::from_raw_os_error(code));
            }
            self.replies.send(frame).map_err(|_| enodev())
        })
    }
}

impl MemoryKernel {
    /// Queue an encoded request.
    pub fn send_request(&self, request: &Request) -> io::Result<()> {
        self.send_raw(request.encode())
    }

    /// Queue arbitrary bytes as one frame.
    pub fn send_raw(&self, frame: Bytes) -> io::Result<()> {
        match &self.requests {
            Some(tx) => tx.send(frame).map_err(|_| enodev()),
            None => Err(enodev()),
        }
    }

    /// Next reply frame, or `None` once the session side is gone.
    pub async fn recv_raw(&mut self) -> Option<Bytes> {
        self.replies.recv().await
    }

    /// Reply frame if one is already queued.
    pub fn try_recv_raw(&mut self) -> Option<Bytes> {
        self.replies.try_recv().ok()
    }

    /// Make the session's next reply write fail with `errno`.
    pub fn fail_next_send(&self, errno: i32) {
        self.send_errors.lock().push_back(errno);
    }

    /// Stop delivering requests; the session sees `ENODEV` once the queue
    /// is drained.
    pub fn close(&mut self) {
        self.requests = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Operation;

    #[tokio::test]
    async fn test_requests_and_replies_flow() {
        let (channel, mut kernel) = memory_channel();
        let request = Request::new(5, 1, Operation::Statfs);
        kernel.send_request(&request).unwrap();

        let frame = channel.receive().await.unwrap();
        assert_eq!(Request::decode(&frame).unwrap(), request);

        channel.send(Bytes::from_static(b"reply")).await.unwrap();
        assert_eq!(&kernel.recv_raw().await.unwrap()[..], b"reply");
    }

    #[tokio::test]
    async fn test_close_reports_enodev() {
        let (channel, mut kernel) = memory_channel();
        kernel.close();
        let err = channel.receive().await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
    }

    #[tokio::test]
    async fn test_injected_send_error() {
        let (channel, mut kernel) = memory_channel();
        kernel.fail_next_send(libc::ENOENT);
        let err = channel.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        channel.send(Bytes::from_static(b"y")).await.unwrap();
        assert_eq!(&kernel.recv_raw().await.unwrap()[..], b"y");
    }

    #[tokio::test]
    async fn test_dropping_channel_ends_replies() {
        let (channel, mut kernel) = memory_channel();
        drop(channel);
        assert!(kernel.recv_raw().await.is_none());
    }
}
