//! INIT negotiation.
//!
//! The kernel opens every connection with INIT carrying its protocol version
//! and the capability flags it offers. We answer with the lower of the two
//! versions and the intersection of the flags; if the kernel's major version
//! is newer than ours, we answer with our own version and the kernel retries.

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{SessionError, SessionResult};
use crate::channel::{is_disconnect, is_retryable, KernelChannel};
use crate::config::SessionConfig;
use crate::wire::{abi, Errno, InitIn, InitOut, Operation, Reply, ReplyBody, Request};

/// An accepted INIT, not yet answered.
#[derive(Debug, Clone, Copy)]
pub(super) struct Negotiated {
    pub unique: u64,
    pub kernel: InitIn,
    pub reply: InitOut,
}

/// Wait for an acceptable INIT.
///
/// Unacceptable versions are answered here; the accepted one is left for the
/// caller to answer once the filesystem is ready.
pub(super) async fn negotiate(
    channel: &dyn KernelChannel,
    config: &SessionConfig,
) -> SessionResult<Negotiated> {
    loop {
        let frame = receive(channel).await?;
        let request = Request::decode(&frame)
            .map_err(|e| SessionError::Handshake(format!("malformed first request: {}", e)))?;
        let unique = request.unique();

        let kernel = match request.operation {
            Operation::Init(init) => init,
            other => {
                let opcode = other.opcode();
                if opcode.expects_reply() {
                    send(channel, Reply::error(unique, Errno::EIO)).await?;
                }
                return Err(SessionError::Handshake(format!(
                    "expected INIT, got {:?}",
                    opcode
                )));
            }
        };

        info!(
            major = kernel.major,
            minor = kernel.minor,
            flags = %format!("{:#x}", kernel.flags),
            "INIT received"
        );

        if kernel.major > abi::KERNEL_VERSION {
            debug!(unique, "Kernel major is newer, offering ours");
            let ours = InitOut {
                major: abi::KERNEL_VERSION,
                minor: abi::KERNEL_MINOR_VERSION,
                ..InitOut::default()
            };
            send(channel, Reply::ok(unique, ReplyBody::Init(ours))).await?;
            continue;
        }

        if kernel.major < abi::KERNEL_VERSION || kernel.minor < abi::MIN_KERNEL_MINOR_VERSION {
            warn!(major = kernel.major, minor = kernel.minor, "Unsupported kernel protocol");
            send(channel, Reply::error(unique, Errno::EPROTO)).await?;
            return Err(SessionError::UnsupportedProtocol {
                major: kernel.major,
                minor: kernel.minor,
            });
        }

        return Ok(Negotiated {
            unique,
            kernel,
            reply: init_reply(&kernel, config),
        });
    }
}

/// Our answer to an acceptable kernel INIT.
pub fn init_reply(kernel: &InitIn, config: &SessionConfig) -> InitOut {
    let flags = kernel.flags & abi::SUPPORTED_CAPABILITIES & config.capabilities;
    let max_pages = if (flags & abi::FUSE_MAX_PAGES) != 0 {
        config.max_pages()
    } else {
        0
    };
    InitOut {
        major: abi::KERNEL_VERSION,
        minor: kernel.minor.min(abi::KERNEL_MINOR_VERSION),
        max_readahead: kernel.max_readahead.min(config.max_readahead),
        flags,
        max_background: config.max_background,
        congestion_threshold: config.congestion_threshold,
        max_write: config.max_write,
        time_gran: config.time_gran,
        max_pages,
    }
}

async fn receive(channel: &dyn KernelChannel) -> SessionResult<Bytes> {
    loop {
        match channel.receive().await {
            Ok(frame) if frame.is_empty() => break Err(closed()),
            Ok(frame) => break Ok(frame),
            Err(e) if is_disconnect(&e) => break Err(closed()),
            Err(e) if is_retryable(&e) => continue,
            Err(e) => break Err(e.into()),
        }
    }
}

pub(super) async fn send(channel: &dyn KernelChannel, reply: Reply) -> SessionResult<()> {
    channel.send(reply.encode()).await.map_err(|e| {
        if is_disconnect(&e) {
            closed()
        } else {
            e.into()
        }
    })
}

fn closed() -> SessionError {
    SessionError::Handshake("kernel closed the connection during INIT".to_string())
}
