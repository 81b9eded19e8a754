//! Per-opcode request handling.
//!
//! Translates a decoded [`Operation`] into a [`Filesystem`] call and the
//! result into a reply body, keeping the inode and handle tables in step.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Shared;
use crate::fs::{Entry, FileAttr, NodeId, RequestContext, SetAttr};
use crate::inode::FileHandle;
use crate::wire::{abi, AttrOut, DirentBuf, Errno, EntryOut, OpenOut, Operation, ReplyBody};

/// Table changes made while answering one request, undone if the reply is
/// discarded.
#[derive(Debug, Default)]
pub(super) struct Effects {
    /// Inode whose lookup count was incremented.
    pub lookup: Option<u64>,
    /// Session handle allocated for the kernel.
    pub opened: Option<u64>,
}

fn ttl(duration: Duration) -> (u64, u32) {
    (duration.as_secs(), duration.subsec_nanos())
}

impl Shared {
    fn resolve(&self, ino: u64) -> Result<NodeId, Errno> {
        self.inodes.resolve(ino).ok_or(Errno::ESTALE)
    }

    fn handle(&self, fh: u64) -> Result<FileHandle, Errno> {
        self.handles.get(fh).ok_or(Errno::EBADF)
    }

    fn entry_out(&self, ino: u64, entry: &Entry) -> EntryOut {
        let (entry_valid, entry_valid_nsec) = ttl(self.config.entry_ttl);
        let (attr_valid, attr_valid_nsec) = ttl(self.config.attr_ttl);
        EntryOut {
            nodeid: ino,
            generation: entry.generation,
            entry_valid,
            attr_valid,
            entry_valid_nsec,
            attr_valid_nsec,
            attr: entry.attr.to_wire(ino),
        }
    }

    fn attr_out(&self, ino: u64, attr: &FileAttr) -> AttrOut {
        let (attr_valid, attr_valid_nsec) = ttl(self.config.attr_ttl);
        AttrOut {
            attr_valid,
            attr_valid_nsec,
            attr: attr.to_wire(ino),
        }
    }

    /// Register a resolved entry with the kernel-facing inode table.
    fn remember(&self, entry: &Entry, effects: &mut Effects) -> EntryOut {
        let ino = self.inodes.lookup(entry.node);
        effects.lookup = Some(ino);
        self.entry_out(ino, entry)
    }

    /// Allocate a session handle for a freshly opened node.
    fn open_handle(
        &self,
        ino: u64,
        fs_fh: u64,
        is_dir: bool,
        effects: &mut Effects,
    ) -> Result<u64, Errno> {
        let node = self.inodes.acquire_handle(ino).ok_or(Errno::ESTALE)?;
        let fh = self.handles.insert(FileHandle {
            ino,
            node,
            fs_fh,
            is_dir,
        });
        effects.opened = Some(fh);
        Ok(fh)
    }

    /// Free a session handle; evicts the inode if that was its last
    /// reference.
    pub(super) fn close_handle(&self, handle: &FileHandle) {
        if let Some(node) = self.inodes.release_handle(handle.ino) {
            debug!(ino = handle.ino, node = node.0, "Inode evicted on release");
            self.fs.forget(node);
        }
    }

    /// Drop `count` kernel lookups from `ino`.
    pub(super) fn forget_inode(&self, ino: u64, count: u64) {
        if let Some(node) = self.inodes.forget(ino, count) {
            debug!(ino, node = node.0, "Inode evicted");
            self.fs.forget(node);
        }
    }

    /// Release `handle` in the filesystem on the kernel's behalf, then free
    /// its inode reference.
    async fn release_orphan(&self, fh: u64, handle: FileHandle) {
        let ctx = RequestContext::new(0, 0, 0, 0, CancellationToken::new());
        let result = if handle.is_dir {
            self.fs
                .releasedir(ctx, handle.node, handle.fs_fh, 0)
                .await
        } else {
            self.fs.release(ctx, handle.node, handle.fs_fh, 0).await
        };
        if let Err(e) = result {
            debug!(fh, error = %e, "Release of orphaned handle failed");
        }
        self.close_handle(&handle);
    }

    /// Undo table changes of a request whose reply is being discarded.
    pub(super) async fn roll_back(&self, effects: Effects) {
        if let Some(fh) = effects.opened {
            if let Some(handle) = self.handles.remove(fh) {
                self.release_orphan(fh, handle).await;
            }
        }
        if let Some(ino) = effects.lookup {
            self.forget_inode(ino, 1);
        }
    }

    /// Release every handle the kernel never closed. Returns how many.
    pub(super) async fn release_all(&self) -> usize {
        let remaining = self.handles.drain();
        let count = remaining.len();
        for (fh, handle) in remaining {
            self.release_orphan(fh, handle).await;
        }
        count
    }

    /// Run one request against the filesystem.
    pub(super) async fn execute(
        &self,
        ctx: RequestContext,
        nodeid: u64,
        operation: Operation,
        effects: &mut Effects,
    ) -> Result<ReplyBody, Errno> {
        match operation {
            Operation::Lookup { name } => {
                let parent = self.resolve(nodeid)?;
                let entry = self.fs.lookup(ctx, parent, name).await?;
                Ok(ReplyBody::Entry(self.remember(&entry, effects)))
            }
            Operation::Getattr { fh } => {
                let node = self.resolve(nodeid)?;
                let fs_fh = match fh {
                    Some(fh) => Some(self.handle(fh)?.fs_fh),
                    None => None,
                };
                let attr = self.fs.getattr(ctx, node, fs_fh).await?;
                Ok(ReplyBody::Attr(self.attr_out(nodeid, &attr)))
            }
            Operation::Setattr(raw) => {
                let node = self.resolve(nodeid)?;
                let mut set = SetAttr::from(&raw);
                if let Some(fh) = set.fh {
                    set.fh = Some(self.handle(fh)?.fs_fh);
                }
                let attr = self.fs.setattr(ctx, node, set).await?;
                Ok(ReplyBody::Attr(self.attr_out(nodeid, &attr)))
            }
            Operation::Readlink => {
                let node = self.resolve(nodeid)?;
                Ok(ReplyBody::Data(self.fs.readlink(ctx, node).await?))
            }
            Operation::Mkdir { mode, umask, name } => {
                let parent = self.resolve(nodeid)?;
                let entry = self.fs.mkdir(ctx, parent, name, mode, umask).await?;
                Ok(ReplyBody::Entry(self.remember(&entry, effects)))
            }
            Operation::Unlink { name } => {
                let parent = self.resolve(nodeid)?;
                self.fs.unlink(ctx, parent, name).await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Rmdir { name } => {
                let parent = self.resolve(nodeid)?;
                self.fs.rmdir(ctx, parent, name).await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Open { flags } => {
                let node = self.resolve(nodeid)?;
                let opened = self.fs.open(ctx, node, flags).await?;
                let fh = self.open_handle(nodeid, opened.fh, false, effects)?;
                Ok(ReplyBody::Open(OpenOut {
                    fh,
                    open_flags: opened.flags,
                }))
            }
            Operation::Read {
                fh, offset, size, ..
            } => {
                let handle = self.handle(fh)?;
                let mut data = self
                    .fs
                    .read(ctx, handle.node, handle.fs_fh, offset, size)
                    .await?;
                data.truncate(size as usize);
                self.metrics.bytes_read(data.len() as u64);
                Ok(ReplyBody::Data(data))
            }
            Operation::Write {
                fh,
                offset,
                flags,
                data,
                ..
            } => {
                let handle = self.handle(fh)?;
                let size = self
                    .fs
                    .write(ctx, handle.node, handle.fs_fh, offset, data, flags)
                    .await?;
                Ok(ReplyBody::Write { size })
            }
            Operation::Statfs => {
                let node = self.resolve(nodeid)?;
                let st = self.fs.statfs(ctx, node).await?;
                Ok(ReplyBody::Statfs(st.into()))
            }
            Operation::Release { fh, flags, .. } | Operation::Releasedir { fh, flags, .. } => {
                let handle = self.handles.remove(fh).ok_or(Errno::EBADF)?;
                let result = if handle.is_dir {
                    self.fs.releasedir(ctx, handle.node, handle.fs_fh, flags).await
                } else {
                    self.fs.release(ctx, handle.node, handle.fs_fh, flags).await
                };
                self.close_handle(&handle);
                result?;
                Ok(ReplyBody::Empty)
            }
            Operation::Fsync { fh, fsync_flags } => {
                let handle = self.handle(fh)?;
                let datasync = (fsync_flags & abi::FUSE_FSYNC_FDATASYNC) != 0;
                self.fs
                    .fsync(ctx, handle.node, handle.fs_fh, datasync)
                    .await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Flush { fh, lock_owner } => {
                let handle = self.handle(fh)?;
                self.fs
                    .flush(ctx, handle.node, handle.fs_fh, lock_owner)
                    .await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Opendir { flags } => {
                let node = self.resolve(nodeid)?;
                let opened = self.fs.opendir(ctx, node, flags).await?;
                let fh = self.open_handle(nodeid, opened.fh, true, effects)?;
                Ok(ReplyBody::Open(OpenOut {
                    fh,
                    open_flags: opened.flags,
                }))
            }
            Operation::Readdir { fh, offset, size } => {
                let handle = self.handle(fh)?;
                let entries = self
                    .fs
                    .readdir(ctx, handle.node, handle.fs_fh, offset)
                    .await?;
                let mut buf = DirentBuf::new(size as usize);
                for entry in &entries {
                    let ino = self
                        .inodes
                        .inode_of(entry.node)
                        .unwrap_or(abi::UNKNOWN_INO);
                    if !buf.push(ino, entry.offset, entry.kind.dirent_type(), &entry.name) {
                        break;
                    }
                }
                Ok(ReplyBody::Data(buf.finish()))
            }
            Operation::Fsyncdir { fh, fsync_flags } => {
                let handle = self.handle(fh)?;
                let datasync = (fsync_flags & abi::FUSE_FSYNC_FDATASYNC) != 0;
                self.fs
                    .fsyncdir(ctx, handle.node, handle.fs_fh, datasync)
                    .await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Access { mask } => {
                let node = self.resolve(nodeid)?;
                self.fs.access(ctx, node, mask).await?;
                Ok(ReplyBody::Empty)
            }
            Operation::Create {
                flags,
                mode,
                umask,
                name,
            } => {
                let parent = self.resolve(nodeid)?;
                let (entry, opened) = self
                    .fs
                    .create(ctx, parent, name, mode, umask, flags)
                    .await?;
                let entry_out = self.remember(&entry, effects);
                let fh = self.open_handle(entry_out.nodeid, opened.fh, false, effects)?;
                Ok(ReplyBody::Create(
                    entry_out,
                    OpenOut {
                        fh,
                        open_flags: opened.flags,
                    },
                ))
            }
            // Answered by the dispatch loop itself.
            Operation::Init(_)
            | Operation::Forget { .. }
            | Operation::BatchForget { .. }
            | Operation::Interrupt { .. }
            | Operation::Destroy
            | Operation::Unsupported { .. } => Err(Errno::ENOSYS),
        }
    }
}
