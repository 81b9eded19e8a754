//! Request dispatch loop.
//!
//! Reads one frame at a time from the kernel channel, decodes it and runs it
//! against the filesystem. Each request gets its own Tokio task, so replies
//! may go out in any order; the unique id correlates them.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────── Dispatcher::run ────────────────────┐
//! KernelChannel ──┤ receive ─► decode ─┬─ FORGET / INTERRUPT ─► tables       │
//!                 │                    ├─ DESTROY ─► ack, stop               │
//!                 │                    ├─ unsupported ─► ENOSYS              │
//!                 │                    └─ other ─► spawn task ─┐             │
//!                 └────────────────────────────────────────────┼─────────────┘
//!                                                              ▼
//!                                      execute ─► abandoned? ─► discard
//!                                                      │ no
//!                                                      ▼
//! KernelChannel ◄──────────────────────────────── send reply
//! ```
//!
//! # Shutdown
//!
//! The loop stops when the shutdown token fires, the kernel closes the
//! channel, DESTROY arrives, or a reply write fails fatally. All in-flight
//! requests are then abandoned and their tasks get the configured grace
//! period to finish before being aborted. Handles the kernel never released
//! are released last.

mod handler;
mod inflight;

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{is_disconnect, is_retryable, KernelChannel};
use crate::config::SessionConfig;
use crate::fs::{Filesystem, RequestContext};
use crate::inode::{HandleTable, InodeTable};
use crate::telemetry::SessionMetrics;
use crate::wire::{abi, Errno, Operation, Reply, ReplyBody, RequestHeader};

use handler::Effects;
pub use inflight::InFlight;

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The kernel closed the channel (`ENODEV` or end of file).
    KernelUnmounted,
    /// DESTROY was received and acknowledged.
    Destroyed,
    /// Shutdown was requested locally.
    UnmountRequested,
}

impl LoopExit {
    /// Whether the kernel may still consider the filesystem mounted.
    pub fn still_attached(self) -> bool {
        matches!(self, LoopExit::UnmountRequested)
    }
}

/// Outcome of writing one reply.
#[derive(Debug)]
enum SendOutcome {
    Sent,
    /// The kernel no longer waits for this reply (`ENOENT`).
    Dropped,
    /// The channel is gone (`ENODEV`).
    Disconnected,
    Failed(io::Error),
}

/// Reported by request tasks to the loop.
#[derive(Debug)]
enum TaskEvent {
    Disconnected,
    Fatal(io::Error),
}

/// Whether the loop keeps reading after a frame.
enum Flow {
    Continue,
    Stop(LoopExit),
}

/// State shared by the loop and its request tasks.
struct Shared {
    fs: Arc<dyn Filesystem>,
    channel: Arc<dyn KernelChannel>,
    inodes: Arc<InodeTable>,
    handles: HandleTable,
    in_flight: InFlight,
    config: SessionConfig,
    metrics: Arc<SessionMetrics>,
}

impl Shared {
    async fn send(&self, reply: Reply) -> SendOutcome {
        let unique = reply.unique;
        let is_error = reply.result.is_err();
        match self.channel.send(reply.encode()).await {
            Ok(()) => {
                self.metrics.reply_sent(is_error);
                SendOutcome::Sent
            }
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => {
                debug!(unique, "Kernel dropped request before reply");
                SendOutcome::Dropped
            }
            Err(e) if is_disconnect(&e) => SendOutcome::Disconnected,
            Err(e) => SendOutcome::Failed(e),
        }
    }
}

/// Dispatches kernel requests to a [`Filesystem`].
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        fs: Arc<dyn Filesystem>,
        channel: Arc<dyn KernelChannel>,
        inodes: Arc<InodeTable>,
        config: SessionConfig,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fs,
                channel,
                inodes,
                handles: HandleTable::new(),
                in_flight: InFlight::new(),
                config,
                metrics,
            }),
        }
    }

    /// Run until shutdown, kernel unmount, DESTROY, or a fatal write error.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that ended the loop if it was not a normal
    /// unmount.
    pub async fn run(&self, shutdown: CancellationToken) -> io::Result<LoopExit> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        let exit = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Unmount requested");
                    break Ok(LoopExit::UnmountRequested);
                }

                Some(event) = events_rx.recv() => match event {
                    TaskEvent::Disconnected => break Ok(LoopExit::KernelUnmounted),
                    TaskEvent::Fatal(e) => break Err(e),
                },

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Request task panicked");
                        }
                    }
                }

                frame = self.shared.channel.receive() => match frame {
                    Ok(frame) if frame.is_empty() => break Ok(LoopExit::KernelUnmounted),
                    Ok(frame) => match self.handle_frame(frame, &mut tasks, &events_tx).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Stop(exit)) => break Ok(exit),
                        Err(e) => break Err(e),
                    },
                    Err(e) if is_disconnect(&e) => break Ok(LoopExit::KernelUnmounted),
                    Err(e) if is_retryable(&e) => {
                        trace!(error = %e, "Retrying read");
                    }
                    Err(e) => break Err(e),
                },
            }
        };

        self.drain(tasks).await;
        let released = self.shared.release_all().await;
        if released > 0 {
            debug!(count = released, "Released handles still open at unmount");
        }
        exit
    }

    /// Abandon everything in flight and wait for the tasks, bounded by the
    /// grace period.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        let abandoned = self.shared.in_flight.abandon_all();
        if abandoned > 0 {
            info!(count = abandoned, "Abandoning in-flight requests");
        }
        let grace = self.shared.config.shutdown_grace;
        let finished = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(
                remaining = tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Handlers still running after grace period, aborting"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    async fn handle_frame(
        &self,
        frame: Bytes,
        tasks: &mut JoinSet<()>,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) -> io::Result<Flow> {
        let shared = &self.shared;
        shared.metrics.request_received();

        if frame.len() < abi::IN_HEADER_SIZE {
            shared.metrics.malformed();
            warn!(len = frame.len(), "Dropping frame shorter than a request header");
            return Ok(Flow::Continue);
        }

        let header = match RequestHeader::decode(&frame) {
            Ok(header) => header,
            Err(e) => {
                let unique = raw_unique(&frame);
                shared.metrics.malformed();
                warn!(unique, error = %e, "Malformed request header");
                return self.reply_inline(Reply::error(unique, Errno::ENOSYS)).await;
            }
        };
        let unique = header.unique;

        let operation = match Operation::decode(header.opcode, &frame[abi::IN_HEADER_SIZE..]) {
            Ok(operation) => operation,
            Err(e) => {
                shared.metrics.malformed();
                warn!(unique, opcode = ?header.opcode, error = %e, "Malformed request body");
                return self.reply_inline(Reply::error(unique, Errno::ENOSYS)).await;
            }
        };

        debug!(unique, opcode = ?header.opcode, nodeid = header.nodeid, "Request");

        match operation {
            Operation::Forget { nlookup } => {
                shared.metrics.forgets(1);
                shared.forget_inode(header.nodeid, nlookup);
                Ok(Flow::Continue)
            }
            Operation::BatchForget { nodes } => {
                shared.metrics.forgets(nodes.len() as u64);
                for node in nodes {
                    shared.forget_inode(node.nodeid, node.nlookup);
                }
                Ok(Flow::Continue)
            }
            Operation::Interrupt { unique: target } => {
                shared.metrics.interrupt();
                if shared.in_flight.abandon(target) {
                    debug!(unique = target, "Request interrupted");
                } else {
                    trace!(unique = target, "Interrupt for request no longer in flight");
                }
                Ok(Flow::Continue)
            }
            Operation::Init(_) => {
                warn!(unique, "INIT received on an initialized session");
                self.reply_inline(Reply::error(unique, Errno::EIO)).await
            }
            Operation::Destroy => {
                info!(unique, "DESTROY received");
                match self.reply_inline(Reply::ok(unique, ReplyBody::Empty)).await? {
                    Flow::Continue => Ok(Flow::Stop(LoopExit::Destroyed)),
                    stop => Ok(stop),
                }
            }
            Operation::Unsupported { opcode } => {
                shared.metrics.unsupported();
                debug!(unique, opcode, "Unsupported opcode");
                self.reply_inline(Reply::error(unique, Errno::ENOSYS)).await
            }
            operation => {
                self.spawn_request(header, operation, tasks, events);
                Ok(Flow::Continue)
            }
        }
    }

    fn spawn_request(
        &self,
        header: RequestHeader,
        operation: Operation,
        tasks: &mut JoinSet<()>,
        events: &mpsc::UnboundedSender<TaskEvent>,
    ) {
        let unique = header.unique;
        let token = self.shared.in_flight.register(unique);
        let shared = Arc::clone(&self.shared);
        let events = events.clone();

        tasks.spawn(async move {
            let ctx = RequestContext::new(unique, header.uid, header.gid, header.pid, token.clone());
            let mut effects = Effects::default();
            let result = shared
                .execute(ctx, header.nodeid, operation, &mut effects)
                .await;
            shared.in_flight.complete(unique);

            if token.is_cancelled() {
                debug!(unique, "Discarding reply to abandoned request");
                shared.metrics.reply_abandoned();
                shared.roll_back(effects).await;
                return;
            }

            if let Err(errno) = &result {
                debug!(unique, errno = errno.code(), "Request failed");
            }
            match shared.send(Reply { unique, result }).await {
                SendOutcome::Sent | SendOutcome::Dropped => {}
                SendOutcome::Disconnected => {
                    let _ = events.send(TaskEvent::Disconnected);
                }
                SendOutcome::Failed(e) => {
                    error!(unique, error = %e, "Reply write failed");
                    let _ = events.send(TaskEvent::Fatal(e));
                }
            }
        });
    }

    async fn reply_inline(&self, reply: Reply) -> io::Result<Flow> {
        match self.shared.send(reply).await {
            SendOutcome::Sent | SendOutcome::Dropped => Ok(Flow::Continue),
            SendOutcome::Disconnected => Ok(Flow::Stop(LoopExit::KernelUnmounted)),
            SendOutcome::Failed(e) => {
                error!(error = %e, "Reply write failed");
                Err(e)
            }
        }
    }
}

/// Unique id straight from the header bytes of a frame that failed to decode.
fn raw_unique(frame: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&frame[8..16]);
    u64::from_ne_bytes(bytes)
}
