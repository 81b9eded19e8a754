//! Mounted filesystem sessions.
//!
//! A [`Session`] ties a mount, its kernel channel and a [`Filesystem`]
//! together and walks them through their lifecycle:
//!
//! ```text
//! Session::mount ─► mount(2) / fusermount ─► INIT ─► Active
//!                                                      │
//!                                   Session::run ◄─────┘
//!                                        │
//!            request_unmount / kernel unmount / DESTROY
//!                                        │
//!                                        ▼
//!                     Unmounting: abandon in-flight, destroy(),
//!                     close descriptor, fusermount -u if attached
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hellofs::hello::HelloFs;
//! use hellofs::mount::MountOptions;
//! use hellofs::config::SessionConfig;
//! use hellofs::session::Session;
//!
//! let mut session = Session::mount(
//!     Arc::new(HelloFs::new()),
//!     "/mnt/hello",
//!     MountOptions::default(),
//!     SessionConfig::default(),
//! )
//! .await?;
//!
//! let unmounter = session.unmounter();
//! ctrlc::set_handler(move || unmounter.request_unmount())?;
//! session.run().await?;
//! ```

mod error;
mod init;
mod state;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{DeviceChannel, KernelChannel};
use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, LoopExit};
use crate::fs::Filesystem;
use crate::inode::InodeTable;
use crate::mount::{self, FusermountUnmount, MountError, MountOptions, MountResult, Unmount};
use crate::telemetry::SessionMetrics;
use crate::wire::{Errno, InitOut, Reply, ReplyBody};

pub use error::{SessionError, SessionResult};
pub use init::init_reply;
pub use state::SessionState;

/// Cloneable trigger that asks a running session to unmount.
///
/// Safe to call from signal handlers and other threads; repeated calls are
/// harmless.
#[derive(Debug, Clone)]
pub struct SessionUnmounter {
    token: CancellationToken,
}

impl SessionUnmounter {
    pub fn request_unmount(&self) {
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A filesystem attached to the kernel.
///
/// Dropping an active session runs the unmount helper synchronously on the
/// dropping thread. On a multi-threaded Tokio runtime the wait goes through
/// [`block_in_place`](tokio::task::block_in_place); on a current-thread
/// runtime it blocks the runtime until the helper exits, so prefer
/// [`run`](Self::run) with [`request_unmount`](Self::request_unmount) there.
pub struct Session {
    state: SessionState,
    fs: Arc<dyn Filesystem>,
    channel: Option<Arc<dyn KernelChannel>>,
    mountpoint: PathBuf,
    config: SessionConfig,
    negotiated: InitOut,
    inodes: Arc<InodeTable>,
    metrics: Arc<SessionMetrics>,
    shutdown: CancellationToken,
    unmounter: Arc<dyn Unmount>,
}

impl Session {
    /// Mount `fs` at `mountpoint` and complete INIT negotiation.
    ///
    /// # Errors
    ///
    /// Any failure leaves nothing mounted: the descriptor is closed and a
    /// completed mount is undone before the error is returned.
    pub async fn mount(
        fs: Arc<dyn Filesystem>,
        mountpoint: impl AsRef<Path>,
        options: MountOptions,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        config.validate()?;
        let requested = mountpoint.as_ref().to_path_buf();
        info!(
            mountpoint = %requested.display(),
            state = %SessionState::Mounting,
            "Mounting filesystem"
        );

        let mounted = tokio::task::spawn_blocking(move || mount::mount(&requested, &options))
            .await
            .map_err(io::Error::other)??;

        let unmounter: Arc<dyn Unmount> = Arc::new(FusermountUnmount::new());
        let mountpoint = mounted.mountpoint;
        let channel = match DeviceChannel::new(mounted.fd, config.max_write) {
            Ok(channel) => channel,
            Err(e) => {
                detach_quietly(Arc::clone(&unmounter), mountpoint).await;
                return Err(e.into());
            }
        };

        Self::with_channel(fs, Arc::new(channel), mountpoint, config, unmounter).await
    }

    /// Start a session on an already attached channel.
    ///
    /// `unmounter` detaches `mountpoint` if the handshake fails or the
    /// session ends while the kernel still has it mounted.
    pub async fn with_channel(
        fs: Arc<dyn Filesystem>,
        channel: Arc<dyn KernelChannel>,
        mountpoint: PathBuf,
        config: SessionConfig,
        unmounter: Arc<dyn Unmount>,
    ) -> SessionResult<Self> {
        let mut state = SessionState::Unmounted;
        advance(&mut state, SessionState::Mounting);
        match Self::handshake(fs.as_ref(), channel.as_ref(), &config).await {
            Ok(negotiated) => {
                advance(&mut state, SessionState::Active);
                info!(
                    mountpoint = %mountpoint.display(),
                    protocol = %format!("{}.{}", negotiated.major, negotiated.minor),
                    flags = %format!("{:#x}", negotiated.flags),
                    "Session established"
                );
                Ok(Self {
                    state,
                    fs,
                    channel: Some(channel),
                    mountpoint,
                    config,
                    negotiated,
                    inodes: Arc::new(InodeTable::new()),
                    metrics: Arc::new(SessionMetrics::new()),
                    shutdown: CancellationToken::new(),
                    unmounter,
                })
            }
            Err(e) => {
                error!(error = %e, "Handshake failed");
                drop(channel);
                detach_quietly(unmounter, mountpoint).await;
                advance(&mut state, SessionState::Unmounted);
                Err(e)
            }
        }
    }

    async fn handshake(
        fs: &dyn Filesystem,
        channel: &dyn KernelChannel,
        config: &SessionConfig,
    ) -> SessionResult<InitOut> {
        let negotiated = init::negotiate(channel, config).await?;
        if let Err(e) = fs.init().await {
            init::send(channel, Reply::error(negotiated.unique, Errno::from(e.clone()))).await?;
            return Err(SessionError::FilesystemInit(e));
        }
        init::send(
            channel,
            Reply::ok(negotiated.unique, ReplyBody::Init(negotiated.reply)),
        )
        .await?;
        debug!(
            kernel_minor = negotiated.kernel.minor,
            max_write = negotiated.reply.max_write,
            max_pages = negotiated.reply.max_pages,
            "INIT answered"
        );
        Ok(negotiated.reply)
    }

    /// Serve requests until unmounted, then tear down.
    ///
    /// Returns after the descriptor is closed and, if the kernel still had
    /// the filesystem mounted, the unmount helper has run once.
    ///
    /// # Errors
    ///
    /// A fatal descriptor error, or the unmount helper's diagnostic. Teardown
    /// completes in both cases.
    pub async fn run(&mut self) -> SessionResult<()> {
        let channel = match (self.state, self.channel.take()) {
            (SessionState::Active, Some(channel)) => channel,
            (actual, _) => {
                return Err(SessionError::InvalidState {
                    expected: SessionState::Active,
                    actual,
                })
            }
        };

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.fs),
            channel,
            Arc::clone(&self.inodes),
            self.config.clone(),
            Arc::clone(&self.metrics),
        );
        let outcome = dispatcher.run(self.shutdown.clone()).await;
        self.set_state(SessionState::Unmounting);

        let attached = match &outcome {
            Ok(exit) => {
                info!(reason = ?exit, "Dispatch loop finished");
                exit.still_attached()
            }
            Err(e) => {
                error!(error = %e, "Dispatch loop failed");
                true
            }
        };

        if let Err(e) = self.fs.destroy().await {
            warn!(error = %e, "Filesystem destroy failed");
        }

        // Last reference to the channel; closes the descriptor.
        drop(dispatcher);

        let detached = if attached {
            detach(Arc::clone(&self.unmounter), self.mountpoint.clone()).await
        } else {
            Ok(())
        };
        self.set_state(SessionState::Unmounted);

        if let Err(e) = &detached {
            error!(mountpoint = %self.mountpoint.display(), error = %e, "Unmount failed");
        }
        outcome?;
        detached.map_err(SessionError::Unmount)?;
        info!(mountpoint = %self.mountpoint.display(), "Unmounted");
        Ok(())
    }

    fn set_state(&mut self, next: SessionState) {
        advance(&mut self.state, next);
    }

    /// Ask [`run`](Self::run) to unmount.
    pub fn request_unmount(&self) {
        self.shutdown.cancel();
    }

    /// A handle for requesting unmount from elsewhere.
    pub fn unmounter(&self) -> SessionUnmounter {
        SessionUnmounter {
            token: self.shutdown.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Negotiated protocol version as `(major, minor)`.
    pub fn protocol(&self) -> (u32, u32) {
        (self.negotiated.major, self.negotiated.minor)
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.negotiated.flags
    }

    /// The full INIT reply sent to the kernel.
    pub fn negotiated(&self) -> &InitOut {
        &self.negotiated
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn inode_table(&self) -> Arc<InodeTable> {
        Arc::clone(&self.inodes)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        warn!(
            mountpoint = %self.mountpoint.display(),
            "Session dropped while active, unmounting"
        );
        self.channel.take();
        let result = if on_multi_thread_runtime() {
            tokio::task::block_in_place(|| self.unmounter.unmount(&self.mountpoint))
        } else {
            self.unmounter.unmount(&self.mountpoint)
        };
        if let Err(e) = result {
            error!(mountpoint = %self.mountpoint.display(), error = %e, "Unmount failed");
        }
        self.state = SessionState::Unmounted;
    }
}

fn on_multi_thread_runtime() -> bool {
    matches!(
        Handle::try_current().map(|handle| handle.runtime_flavor()),
        Ok(RuntimeFlavor::MultiThread)
    )
}

/// Move `state` to `next`, logging steps outside the lifecycle.
fn advance(state: &mut SessionState, next: SessionState) {
    if !state.can_transition_to(next) {
        warn!(from = %state, to = %next, "Unexpected session state change");
    }
    debug!(from = %state, to = %next, "Session state");
    *state = next;
}

async fn detach(unmounter: Arc<dyn Unmount>, mountpoint: PathBuf) -> MountResult<()> {
    tokio::task::spawn_blocking(move || unmounter.unmount(&mountpoint))
        .await
        .map_err(|e| MountError::Io(io::Error::other(e)))?
}

async fn detach_quietly(unmounter: Arc<dyn Unmount>, mountpoint: PathBuf) {
    let shown = mountpoint.display().to_string();
    if let Err(e) = detach(unmounter, mountpoint).await {
        warn!(mountpoint = %shown, error = %e, "Could not undo mount");
    }
}
