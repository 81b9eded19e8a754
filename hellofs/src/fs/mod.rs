//! Pluggable filesystem boundary.
//!
//! A [`Filesystem`] answers typed requests on internal [`NodeId`]s. Inode
//! numbers, file handle bookkeeping, lookup counts and the wire format stay on
//! the session side; implementations only see names, nodes and their own
//! handle values.
//!
//! # Async Handlers
//!
//! Every request runs in its own Tokio task, so handlers take `&self` and
//! return boxed futures. One slow handler never stalls the others:
//!
//! ```text
//! Dispatcher                 Tokio Runtime (multi-threaded)
//!    │                              │
//!    ├── READ   unique=4 ──────────►├── spawn task ──► fs.read()
//!    ├── LOOKUP unique=5 ──────────►├── spawn task ──► fs.lookup()
//!    ├── GETATTR unique=6 ─────────►├── spawn task ──► fs.getattr()
//!    │◄── replies (any order) ──────┤
//! ```
//!
//! Operations left unimplemented answer `ENOSYS`, except the open, release,
//! flush and access family which succeed by default.

mod error;
mod types;

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

pub use error::{FsError, FsResult};
pub use types::{
    split_time, DirEntry, Entry, FileAttr, FileType, NodeId, Opened, RequestContext, SetAttr,
    StatFs, TimeOrNow,
};

/// Boxed future returned by [`Filesystem`] handlers.
pub type FsFuture<'a, T> = Pin<Box<dyn Future<Output = FsResult<T>> + Send + 'a>>;

fn ready<'a, T: Send + 'a>(result: FsResult<T>) -> FsFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

/// A filesystem served through a [`Session`](crate::session::Session).
#[allow(unused_variables)]
pub trait Filesystem: Send + Sync + 'static {
    /// Called once after INIT negotiation, before the first request.
    fn init(&self) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    /// Called once when the session ends.
    fn destroy(&self) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    /// Resolve `name` inside directory `parent`.
    fn lookup(&self, ctx: RequestContext, parent: NodeId, name: OsString) -> FsFuture<'_, Entry> {
        ready(Err(FsError::Unsupported))
    }

    /// The kernel no longer references `node`.
    fn forget(&self, node: NodeId) {}

    fn getattr(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: Option<u64>,
    ) -> FsFuture<'_, FileAttr> {
        ready(Err(FsError::Unsupported))
    }

    fn setattr(&self, ctx: RequestContext, node: NodeId, set: SetAttr) -> FsFuture<'_, FileAttr> {
        ready(Err(FsError::Unsupported))
    }

    fn readlink(&self, ctx: RequestContext, node: NodeId) -> FsFuture<'_, Bytes> {
        ready(Err(FsError::Unsupported))
    }

    fn mkdir(
        &self,
        ctx: RequestContext,
        parent: NodeId,
        name: OsString,
        mode: u32,
        umask: u32,
    ) -> FsFuture<'_, Entry> {
        ready(Err(FsError::Unsupported))
    }

    fn unlink(&self, ctx: RequestContext, parent: NodeId, name: OsString) -> FsFuture<'_, ()> {
        ready(Err(FsError::Unsupported))
    }

    fn rmdir(&self, ctx: RequestContext, parent: NodeId, name: OsString) -> FsFuture<'_, ()> {
        ready(Err(FsError::Unsupported))
    }

    fn open(&self, ctx: RequestContext, node: NodeId, flags: u32) -> FsFuture<'_, Opened> {
        ready(Ok(Opened::default()))
    }

    /// Read up to `size` bytes at `offset`. A short result means end of file.
    fn read(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FsFuture<'_, Bytes> {
        ready(Err(FsError::Unsupported))
    }

    /// Returns the number of bytes written.
    fn write(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        offset: u64,
        data: Bytes,
        flags: u32,
    ) -> FsFuture<'_, u32> {
        ready(Err(FsError::Unsupported))
    }

    fn flush(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        lock_owner: u64,
    ) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    fn release(&self, ctx: RequestContext, node: NodeId, fh: u64, flags: u32) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    fn fsync(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        datasync: bool,
    ) -> FsFuture<'_, ()> {
        ready(Err(FsError::Unsupported))
    }

    fn opendir(&self, ctx: RequestContext, node: NodeId, flags: u32) -> FsFuture<'_, Opened> {
        ready(Ok(Opened::default()))
    }

    /// List entries after cookie `offset` (0 starts from the beginning).
    ///
    /// The session packs as many as fit in the kernel's buffer; the rest are
    /// requested again with the last packed entry's offset.
    fn readdir(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        offset: u64,
    ) -> FsFuture<'_, Vec<DirEntry>> {
        ready(Err(FsError::Unsupported))
    }

    fn releasedir(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        flags: u32,
    ) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    fn fsyncdir(
        &self,
        ctx: RequestContext,
        node: NodeId,
        fh: u64,
        datasync: bool,
    ) -> FsFuture<'_, ()> {
        ready(Err(FsError::Unsupported))
    }

    fn statfs(&self, ctx: RequestContext, node: NodeId) -> FsFuture<'_, StatFs> {
        ready(Err(FsError::Unsupported))
    }

    fn access(&self, ctx: RequestContext, node: NodeId, mask: u32) -> FsFuture<'_, ()> {
        ready(Ok(()))
    }

    /// Create and open a regular file.
    fn create(
        &self,
        ctx: RequestContext,
        parent: NodeId,
        name: OsString,
        mode: u32,
        umask: u32,
        flags: u32,
    ) -> FsFuture<'_, (Entry, Opened)> {
        ready(Err(FsError::Unsupported))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct Empty;

    impl Filesystem for Empty {}

    fn ctx() -> RequestContext {
        RequestContext::new(1, 0, 0, 0, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_defaults() {
        let fs = Empty;
        assert_eq!(
            fs.lookup(ctx(), NodeId::ROOT, OsString::from("x")).await,
            Err(FsError::Unsupported)
        );
        assert_eq!(
            fs.read(ctx(), NodeId::ROOT, 0, 0, 10).await,
            Err(FsError::Unsupported)
        );
        assert_eq!(fs.open(ctx(), NodeId::ROOT, 0).await, Ok(Opened::default()));
        assert_eq!(fs.opendir(ctx(), NodeId::ROOT, 0).await, Ok(Opened::default()));
        assert_eq!(fs.release(ctx(), NodeId::ROOT, 0, 0).await, Ok(()));
        assert_eq!(fs.flush(ctx(), NodeId::ROOT, 0, 0).await, Ok(()));
        assert_eq!(fs.init().await, Ok(()));
    }
}
