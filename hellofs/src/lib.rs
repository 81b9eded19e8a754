//! hellofs - a user-space FUSE session layer for Linux
//!
//! This library attaches a filesystem to the kernel through `/dev/fuse`,
//! speaks the FUSE wire protocol and dispatches requests to a pluggable
//! [`Filesystem`](fs::Filesystem) implementation. The bundled
//! [`HelloFs`](hello::HelloFs) serves a single read-only file.
//!
//! # Layers
//!
//! ```text
//! mount ──► channel ──► session (INIT) ──► dispatch ──► fs::Filesystem
//!                                             │
//!                                    wire ◄───┼───► inode
//! ```

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod fs;
pub mod hello;
pub mod inode;
pub mod logging;
pub mod mount;
pub mod session;
pub mod telemetry;
pub mod wire;

/// Crate version, for banners and logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
