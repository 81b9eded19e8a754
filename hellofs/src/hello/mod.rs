//! Single-file demonstration filesystem.
//!
//! ```text
//! /            drwxr-xr-x
//! └── hello    -rw-r--r--   5 bytes: "hello"
//! ```
//!
//! Everything is read-only; attempts to open the file for writing fail with
//! `EACCES`.

use std::ffi::OsString;
use std::time::SystemTime;

use bytes::Bytes;
use nix::unistd::{getgid, getuid};
use tracing::trace;

use crate::fs::{
    DirEntry, Entry, FileAttr, FileType, Filesystem, FsError, FsFuture, NodeId, Opened,
    RequestContext, StatFs,
};
use crate::wire::abi;

/// Name of the only file.
pub const HELLO_NAME: &str = "hello";

/// Contents of the only file.
pub const HELLO_CONTENT: &[u8] = b"hello";

/// Node of the only file.
pub const HELLO_NODE: NodeId = NodeId(2);

/// The `hello` filesystem.
#[derive(Debug, Clone)]
pub struct HelloFs {
    uid: u32,
    gid: u32,
    created: SystemTime,
    content: Bytes,
}

impl Default for HelloFs {
    fn default() -> Self {
        Self::new()
    }
}

impl HelloFs {
    /// Files owned by the current user, timestamped now.
    pub fn new() -> Self {
        Self {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            created: SystemTime::now(),
            content: Bytes::from_static(HELLO_CONTENT),
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    fn root_attr(&self) -> FileAttr {
        FileAttr::new(FileType::Directory, 0o755, self.uid, self.gid, self.created)
    }

    fn file_attr(&self) -> FileAttr {
        FileAttr::new(FileType::RegularFile, 0o644, self.uid, self.gid, self.created)
            .with_size(self.content.len() as u64)
    }

    fn attr(&self, node: NodeId) -> Result<FileAttr, FsError> {
        match node {
            NodeId::ROOT => Ok(self.root_attr()),
            HELLO_NODE => Ok(self.file_attr()),
            _ => Err(FsError::Stale),
        }
    }

    fn listing(&self) -> Vec<DirEntry> {
        let entry = |offset, node, kind, name: &str| DirEntry {
            node,
            offset,
            kind,
            name: OsString::from(name),
        };
        vec![
            entry(1, NodeId::ROOT, FileType::Directory, "."),
            entry(2, NodeId::ROOT, FileType::Directory, ".."),
            entry(3, HELLO_NODE, FileType::RegularFile, HELLO_NAME),
        ]
    }
}

fn done<'a, T: Send + 'a>(result: Result<T, FsError>) -> FsFuture<'a, T> {
    Box::pin(std::future::ready(result))
}

impl Filesystem for HelloFs {
    fn lookup(&self, _ctx: RequestContext, parent: NodeId, name: OsString) -> FsFuture<'_, Entry> {
        trace!(parent = parent.0, name = ?name, "lookup");
        let result = match parent {
            NodeId::ROOT if name == HELLO_NAME => Ok(Entry::new(HELLO_NODE, self.file_attr())),
            NodeId::ROOT => Err(FsError::NotFound),
            HELLO_NODE => Err(FsError::NotADirectory),
            _ => Err(FsError::Stale),
        };
        done(result)
    }

    fn getattr(
        &self,
        _ctx: RequestContext,
        node: NodeId,
        _fh: Option<u64>,
    ) -> FsFuture<'_, FileAttr> {
        done(self.attr(node))
    }

    fn open(&self, _ctx: RequestContext, node: NodeId, flags: u32) -> FsFuture<'_, Opened> {
        let result = match node {
            HELLO_NODE if (flags as i32 & libc::O_ACCMODE) != libc::O_RDONLY => {
                Err(FsError::PermissionDenied)
            }
            HELLO_NODE => Ok(Opened {
                fh: 0,
                flags: abi::FOPEN_KEEP_CACHE,
            }),
            NodeId::ROOT => Err(FsError::IsADirectory),
            _ => Err(FsError::Stale),
        };
        done(result)
    }

    fn read(
        &self,
        _ctx: RequestContext,
        node: NodeId,
        _fh: u64,
        offset: u64,
        size: u32,
    ) -> FsFuture<'_, Bytes> {
        if node != HELLO_NODE {
            return done(Err(FsError::IsADirectory));
        }
        let len = self.content.len();
        let start = usize::try_from(offset).unwrap_or(len).min(len);
        let end = start.saturating_add(size as usize).min(len);
        done(Ok(self.content.slice(start..end)))
    }

    fn opendir(&self, _ctx: RequestContext, node: NodeId, _flags: u32) -> FsFuture<'_, Opened> {
        let result = match node {
            NodeId::ROOT => Ok(Opened::default()),
            HELLO_NODE => Err(FsError::NotADirectory),
            _ => Err(FsError::Stale),
        };
        done(result)
    }

    fn readdir(
        &self,
        _ctx: RequestContext,
        node: NodeId,
        _fh: u64,
        offset: u64,
    ) -> FsFuture<'_, Vec<DirEntry>> {
        if node != NodeId::ROOT {
            return done(Err(FsError::NotADirectory));
        }
        let entries = self
            .listing()
            .into_iter()
            .filter(|entry| entry.offset > offset)
            .collect();
        done(Ok(entries))
    }

    fn statfs(&self, _ctx: RequestContext, _node: NodeId) -> FsFuture<'_, StatFs> {
        done(Ok(StatFs {
            blocks: 1,
            files: 2,
            ..StatFs::default()
        }))
    }
}
