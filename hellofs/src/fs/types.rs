//! Types exchanged between the dispatcher and filesystem handlers.

use std::ffi::OsString;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::wire::{abi, Attr, SetattrIn, StatfsOut};

/// Filesystem-internal identity of a node.
///
/// Distinct from the kernel-visible inode number; the
/// [`InodeTable`](crate::inode::InodeTable) maps between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The root node. Always mapped to inode 1.
    pub const ROOT: NodeId = NodeId(1);
}

/// File type, as encoded in the `S_IFMT` bits of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    RegularFile,
    Symlink,
    NamedPipe,
    CharDevice,
    BlockDevice,
    Socket,
}

impl FileType {
    /// `S_IFMT` bits.
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Directory => libc::S_IFDIR,
            FileType::RegularFile => libc::S_IFREG,
            FileType::Symlink => libc::S_IFLNK,
            FileType::NamedPipe => libc::S_IFIFO,
            FileType::CharDevice => libc::S_IFCHR,
            FileType::BlockDevice => libc::S_IFBLK,
            FileType::Socket => libc::S_IFSOCK,
        }
    }

    /// `DT_*` value used in directory entries.
    pub fn dirent_type(self) -> u32 {
        self.mode_bits() >> 12
    }
}

/// Node attributes as a filesystem reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub kind: FileType,
    /// Permission bits (`0o7777` mask).
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl FileAttr {
    /// Attributes with the given type and permissions, owned by `uid:gid`,
    /// all timestamps set to `time`.
    pub fn new(kind: FileType, perm: u16, uid: u32, gid: u32, time: SystemTime) -> Self {
        Self {
            size: 0,
            blocks: 0,
            atime: time,
            mtime: time,
            ctime: time,
            kind,
            perm,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid,
            gid,
            rdev: 0,
            blksize: 4096,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self.blocks = size.div_ceil(512);
        self
    }

    pub fn mode(&self) -> u32 {
        self.kind.mode_bits() | u32::from(self.perm & 0o7777)
    }

    /// Wire representation for inode `ino`.
    pub fn to_wire(&self, ino: u64) -> Attr {
        let (atime, atimensec) = split_time(self.atime);
        let (mtime, mtimensec) = split_time(self.mtime);
        let (ctime, ctimensec) = split_time(self.ctime);
        Attr {
            ino,
            size: self.size,
            blocks: self.blocks,
            atime,
            mtime,
            ctime,
            atimensec,
            mtimensec,
            ctimensec,
            mode: self.mode(),
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: 0,
        }
    }
}

/// Seconds and nanoseconds since the epoch; pre-epoch times clamp to zero.
pub fn split_time(time: SystemTime) -> (u64, u32) {
    let since = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    (since.as_secs(), since.subsec_nanos())
}

fn join_time(secs: u64, nsecs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::new(secs, nsecs.min(999_999_999))
}

/// Result of a successful name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub node: NodeId,
    pub attr: FileAttr,
    pub generation: u64,
}

impl Entry {
    pub fn new(node: NodeId, attr: FileAttr) -> Self {
        Self {
            node,
            attr,
            generation: 0,
        }
    }
}

/// Result of a successful OPEN/OPENDIR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Opened {
    /// Filesystem-private handle; handed back on READ/WRITE/RELEASE.
    pub fh: u64,
    /// `FOPEN_*` flags.
    pub flags: u32,
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub node: NodeId,
    /// Cookie the kernel passes back to resume after this entry.
    pub offset: u64,
    pub kind: FileType,
    pub name: OsString,
}

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 512,
            namelen: 255,
            frsize: 512,
        }
    }
}

impl From<StatFs> for StatfsOut {
    fn from(st: StatFs) -> Self {
        StatfsOut {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: st.bsize,
            namelen: st.namelen,
            frsize: st.frsize,
        }
    }
}

/// A timestamp update requested through SETATTR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrNow {
    At(SystemTime),
    Now,
}

/// Attribute changes requested through SETATTR. `None` means unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<TimeOrNow>,
    pub mtime: Option<TimeOrNow>,
    pub ctime: Option<SystemTime>,
    /// Filesystem handle when the change came through an open file.
    pub fh: Option<u64>,
}

impl From<&SetattrIn> for SetAttr {
    fn from(s: &SetattrIn) -> Self {
        let has = |bit: u32| (s.valid & bit) != 0;
        let time = |now_bit: u32, bit: u32, secs: u64, nsecs: u32| {
            if has(now_bit) {
                Some(TimeOrNow::Now)
            } else if has(bit) {
                Some(TimeOrNow::At(join_time(secs, nsecs)))
            } else {
                None
            }
        };
        Self {
            mode: has(abi::FATTR_MODE).then_some(s.mode),
            uid: has(abi::FATTR_UID).then_some(s.uid),
            gid: has(abi::FATTR_GID).then_some(s.gid),
            size: has(abi::FATTR_SIZE).then_some(s.size),
            atime: time(abi::FATTR_ATIME_NOW, abi::FATTR_ATIME, s.atime, s.atimensec),
            mtime: time(abi::FATTR_MTIME_NOW, abi::FATTR_MTIME, s.mtime, s.mtimensec),
            ctime: has(abi::FATTR_CTIME).then(|| join_time(s.ctime, s.ctimensec)),
            fh: has(abi::FATTR_FH).then_some(s.fh),
        }
    }
}

/// Per-request information handed to every handler.
///
/// `cancel` fires when the kernel interrupts the request or the session is
/// unmounting. Handlers are not cancelled for them; long-running ones should
/// check [`RequestContext::is_interrupted`] or select on
/// [`RequestContext::interrupted`].
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub unique: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(unique: u64, uid: u32, gid: u32, pid: u32, cancel: CancellationToken) -> Self {
        Self {
            unique,
            uid,
            gid,
            pid,
            cancel,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request has been abandoned.
    pub async fn interrupted(&self) {
        self.cancel.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_combines_type_and_perm() {
        let attr = FileAttr::new(FileType::RegularFile, 0o644, 0, 0, UNIX_EPOCH);
        assert_eq!(attr.mode(), libc::S_IFREG | 0o644);

        let dir = FileAttr::new(FileType::Directory, 0o755, 0, 0, UNIX_EPOCH);
        assert_eq!(dir.mode(), libc::S_IFDIR | 0o755);
        assert_eq!(dir.nlink, 2);
    }

    #[test]
    fn test_to_wire_splits_timestamps() {
        let time = UNIX_EPOCH + Duration::new(1_700_000_000, 250);
        let attr = FileAttr::new(FileType::RegularFile, 0o600, 1000, 1000, time).with_size(5);
        let wire = attr.to_wire(2);
        assert_eq!(wire.ino, 2);
        assert_eq!(wire.size, 5);
        assert_eq!(wire.blocks, 1);
        assert_eq!(wire.mtime, 1_700_000_000);
        assert_eq!(wire.mtimensec, 250);
        assert_eq!(wire.uid, 1000);
    }

    #[test]
    fn test_pre_epoch_clamps() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(split_time(before), (0, 0));
    }

    #[test]
    fn test_setattr_decoding() {
        let raw = SetattrIn {
            valid: abi::FATTR_SIZE | abi::FATTR_MTIME_NOW | abi::FATTR_MODE,
            size: 10,
            mode: 0o600,
            ..SetattrIn::default()
        };
        let set = SetAttr::from(&raw);
        assert_eq!(set.size, Some(10));
        assert_eq!(set.mode, Some(0o600));
        assert_eq!(set.mtime, Some(TimeOrNow::Now));
        assert_eq!(set.atime, None);
        assert_eq!(set.uid, None);
        assert_eq!(set.fh, None);
    }

    #[test]
    fn test_dirent_type() {
        assert_eq!(FileType::Directory.dirent_type(), libc::DT_DIR as u32);
        assert_eq!(FileType::RegularFile.dirent_type(), libc::DT_REG as u32);
    }

    #[tokio::test]
    async fn test_context_interrupt() {
        let token = CancellationToken::new();
        let ctx = RequestContext::new(1, 0, 0, 0, token.clone());
        assert!(!ctx.is_interrupted());
        token.cancel();
        ctx.interrupted().await;
        assert!(ctx.is_interrupted());
    }
}
