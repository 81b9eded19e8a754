//! FUSE kernel ABI constants.
//!
//! Values and sizes follow `include/uapi/linux/fuse.h`. Only the subset the
//! session layer speaks is listed; everything else decodes as
//! [`Opcode::Unsupported`].

/// Protocol major version spoken by this crate.
pub const KERNEL_VERSION: u32 = 7;

/// Highest protocol minor version spoken by this crate.
pub const KERNEL_MINOR_VERSION: u32 = 31;

/// Oldest kernel minor version accepted during INIT.
pub const MIN_KERNEL_MINOR_VERSION: u32 = 12;

/// Kernel minors below this receive the short INIT reply.
pub const INIT_OUT_FULL_MINOR: u32 = 23;

/// Inode number of the filesystem root.
pub const ROOT_ID: u64 = 1;

/// Inode number reported in directory entries for nodes without a mapping.
pub const UNKNOWN_INO: u64 = 0xffff_ffff;

pub const IN_HEADER_SIZE: usize = 40;
pub const OUT_HEADER_SIZE: usize = 16;
pub const ATTR_SIZE: usize = 88;
pub const ENTRY_OUT_SIZE: usize = 40 + ATTR_SIZE;
pub const ATTR_OUT_SIZE: usize = 16 + ATTR_SIZE;
pub const OPEN_OUT_SIZE: usize = 16;
pub const WRITE_OUT_SIZE: usize = 8;
pub const STATFS_OUT_SIZE: usize = 80;
pub const INIT_IN_SIZE: usize = 16;
pub const INIT_OUT_SIZE: usize = 64;
pub const INIT_OUT_COMPAT_SIZE: usize = 24;
pub const DIRENT_HEADER_SIZE: usize = 24;

/// Smallest read buffer the kernel accepts.
pub const MIN_READ_BUFFER: usize = 8192;

/// Room for a header plus the largest non-data payload (a WRITE header).
pub const BUFFER_HEADROOM: usize = 4096;

// Capability flags exchanged in INIT.
pub const FUSE_ASYNC_READ: u32 = 1 << 0;
pub const FUSE_POSIX_LOCKS: u32 = 1 << 1;
pub const FUSE_ATOMIC_O_TRUNC: u32 = 1 << 3;
pub const FUSE_EXPORT_SUPPORT: u32 = 1 << 4;
pub const FUSE_BIG_WRITES: u32 = 1 << 5;
pub const FUSE_DONT_MASK: u32 = 1 << 6;
pub const FUSE_FLOCK_LOCKS: u32 = 1 << 10;
pub const FUSE_AUTO_INVAL_DATA: u32 = 1 << 12;
pub const FUSE_DO_READDIRPLUS: u32 = 1 << 13;
pub const FUSE_PARALLEL_DIROPS: u32 = 1 << 18;
pub const FUSE_MAX_PAGES: u32 = 1 << 22;

/// Capabilities this session layer knows how to honour.
pub const SUPPORTED_CAPABILITIES: u32 = FUSE_ASYNC_READ
    | FUSE_ATOMIC_O_TRUNC
    | FUSE_BIG_WRITES
    | FUSE_AUTO_INVAL_DATA
    | FUSE_PARALLEL_DIROPS
    | FUSE_MAX_PAGES;

// SETATTR `valid` bits.
pub const FATTR_MODE: u32 = 1 << 0;
pub const FATTR_UID: u32 = 1 << 1;
pub const FATTR_GID: u32 = 1 << 2;
pub const FATTR_SIZE: u32 = 1 << 3;
pub const FATTR_ATIME: u32 = 1 << 4;
pub const FATTR_MTIME: u32 = 1 << 5;
pub const FATTR_FH: u32 = 1 << 6;
pub const FATTR_ATIME_NOW: u32 = 1 << 7;
pub const FATTR_MTIME_NOW: u32 = 1 << 8;
pub const FATTR_CTIME: u32 = 1 << 10;

// OPEN reply flags.
pub const FOPEN_DIRECT_IO: u32 = 1 << 0;
pub const FOPEN_KEEP_CACHE: u32 = 1 << 1;
pub const FOPEN_NONSEEKABLE: u32 = 1 << 2;

pub const FUSE_GETATTR_FH: u32 = 1 << 0;
pub const FUSE_RELEASE_FLUSH: u32 = 1 << 0;
pub const FUSE_FSYNC_FDATASYNC: u32 = 1 << 0;

/// Request opcodes understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Lookup,
    Forget,
    Getattr,
    Setattr,
    Readlink,
    Mkdir,
    Unlink,
    Rmdir,
    Open,
    Read,
    Write,
    Statfs,
    Release,
    Fsync,
    Flush,
    Init,
    Opendir,
    Readdir,
    Releasedir,
    Fsyncdir,
    Access,
    Create,
    Interrupt,
    Destroy,
    BatchForget,
    /// Framed but not implemented here (xattr, locks, ioctl, ...).
    Unsupported(u32),
}

impl Opcode {
    /// Map a raw opcode; unknown values become [`Opcode::Unsupported`].
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::Lookup,
            2 => Self::Forget,
            3 => Self::Getattr,
            4 => Self::Setattr,
            5 => Self::Readlink,
            9 => Self::Mkdir,
            10 => Self::Unlink,
            11 => Self::Rmdir,
            14 => Self::Open,
            15 => Self::Read,
            16 => Self::Write,
            17 => Self::Statfs,
            18 => Self::Release,
            20 => Self::Fsync,
            25 => Self::Flush,
            26 => Self::Init,
            27 => Self::Opendir,
            28 => Self::Readdir,
            29 => Self::Releasedir,
            30 => Self::Fsyncdir,
            34 => Self::Access,
            35 => Self::Create,
            36 => Self::Interrupt,
            38 => Self::Destroy,
            42 => Self::BatchForget,
            other => Self::Unsupported(other),
        }
    }

    /// Raw value as carried in the request header.
    pub fn raw(self) -> u32 {
        match self {
            Self::Lookup => 1,
            Self::Forget => 2,
            Self::Getattr => 3,
            Self::Setattr => 4,
            Self::Readlink => 5,
            Self::Mkdir => 9,
            Self::Unlink => 10,
            Self::Rmdir => 11,
            Self::Open => 14,
            Self::Read => 15,
            Self::Write => 16,
            Self::Statfs => 17,
            Self::Release => 18,
            Self::Fsync => 20,
            Self::Flush => 25,
            Self::Init => 26,
            Self::Opendir => 27,
            Self::Readdir => 28,
            Self::Releasedir => 29,
            Self::Fsyncdir => 30,
            Self::Access => 34,
            Self::Create => 35,
            Self::Interrupt => 36,
            Self::Destroy => 38,
            Self::BatchForget => 42,
            Self::Unsupported(raw) => raw,
        }
    }

    /// Whether the kernel waits for a reply to this opcode.
    pub fn expects_reply(self) -> bool {
        !matches!(self, Self::Forget | Self::BatchForget | Self::Interrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_raw_roundtrip() {
        for raw in 0..64u32 {
            assert_eq!(Opcode::from_raw(raw).raw(), raw);
        }
        assert_eq!(Opcode::from_raw(4096).raw(), 4096);
    }

    #[test]
    fn test_xattr_opcodes_are_unsupported() {
        // SETXATTR, GETXATTR, LISTXATTR, REMOVEXATTR
        for raw in 21..=24 {
            assert_eq!(Opcode::from_raw(raw), Opcode::Unsupported(raw));
        }
        // IOCTL
        assert_eq!(Opcode::from_raw(39), Opcode::Unsupported(39));
    }

    #[test]
    fn test_no_reply_opcodes() {
        assert!(!Opcode::Forget.expects_reply());
        assert!(!Opcode::BatchForget.expects_reply());
        assert!(!Opcode::Interrupt.expects_reply());
        assert!(Opcode::Lookup.expects_reply());
        assert!(Opcode::Destroy.expects_reply());
    }

    #[test]
    fn test_struct_sizes_match_kernel() {
        assert_eq!(ENTRY_OUT_SIZE, 128);
        assert_eq!(ATTR_OUT_SIZE, 104);
    }
}
