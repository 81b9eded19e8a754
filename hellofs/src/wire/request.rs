//! Kernel → user space messages.

use std::ffi::OsString;

use bytes::{BufMut, Bytes, BytesMut};

use super::abi::{self, Opcode};
use super::cursor::{put_name, Cursor};
use super::{DecodeError, DecodeResult};

/// Fixed request header, minus the length field (validated on decode,
/// computed on encode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl RequestHeader {
    /// Decode the header and check the declared length against `buf`.
    pub fn decode(buf: &[u8]) -> DecodeResult<Self> {
        let mut cursor = Cursor::new(buf);
        let len = cursor.u32()?;
        if len as usize != buf.len() {
            return Err(DecodeError::LengthMismatch {
                declared: len as usize,
                actual: buf.len(),
            });
        }
        let opcode = Opcode::from_raw(cursor.u32()?);
        let unique = cursor.u64()?;
        let nodeid = cursor.u64()?;
        let uid = cursor.u32()?;
        let gid = cursor.u32()?;
        let pid = cursor.u32()?;
        cursor.skip(4)?;
        Ok(Self {
            opcode,
            unique,
            nodeid,
            uid,
            gid,
            pid,
        })
    }

    fn encode(&self, body_len: usize, out: &mut BytesMut) {
        out.put_u32_ne((abi::IN_HEADER_SIZE + body_len) as u32);
        out.put_u32_ne(self.opcode.raw());
        out.put_u64_ne(self.unique);
        out.put_u64_ne(self.nodeid);
        out.put_u32_ne(self.uid);
        out.put_u32_ne(self.gid);
        out.put_u32_ne(self.pid);
        out.put_u32_ne(0);
    }
}

/// INIT payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitIn {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: u32,
}

/// SETATTR payload; `valid` says which fields are meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetattrIn {
    pub valid: u32,
    pub fh: u64,
    pub size: u64,
    pub lock_owner: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// One node in a BATCH_FORGET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForgetOne {
    pub nodeid: u64,
    pub nlookup: u64,
}

/// Opcode-specific request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Lookup {
        name: OsString,
    },
    Forget {
        nlookup: u64,
    },
    BatchForget {
        nodes: Vec<ForgetOne>,
    },
    Getattr {
        fh: Option<u64>,
    },
    Setattr(SetattrIn),
    Readlink,
    Mkdir {
        mode: u32,
        umask: u32,
        name: OsString,
    },
    Unlink {
        name: OsString,
    },
    Rmdir {
        name: OsString,
    },
    Open {
        flags: u32,
    },
    Read {
        fh: u64,
        offset: u64,
        size: u32,
        read_flags: u32,
        lock_owner: u64,
        flags: u32,
    },
    Write {
        fh: u64,
        offset: u64,
        write_flags: u32,
        lock_owner: u64,
        flags: u32,
        data: Bytes,
    },
    Statfs,
    Release {
        fh: u64,
        flags: u32,
        release_flags: u32,
        lock_owner: u64,
    },
    Fsync {
        fh: u64,
        fsync_flags: u32,
    },
    Flush {
        fh: u64,
        lock_owner: u64,
    },
    Init(InitIn),
    Opendir {
        flags: u32,
    },
    Readdir {
        fh: u64,
        offset: u64,
        size: u32,
    },
    Releasedir {
        fh: u64,
        flags: u32,
        release_flags: u32,
        lock_owner: u64,
    },
    Fsyncdir {
        fh: u64,
        fsync_flags: u32,
    },
    Access {
        mask: u32,
    },
    Create {
        flags: u32,
        mode: u32,
        umask: u32,
        name: OsString,
    },
    Interrupt {
        unique: u64,
    },
    Destroy,
    /// Framed request with an opcode this layer does not implement.
    Unsupported {
        opcode: u32,
    },
}

impl Operation {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Lookup { .. } => Opcode::Lookup,
            Self::Forget { .. } => Opcode::Forget,
            Self::BatchForget { .. } => Opcode::BatchForget,
            Self::Getattr { .. } => Opcode::Getattr,
            Self::Setattr(_) => Opcode::Setattr,
            Self::Readlink => Opcode::Readlink,
            Self::Mkdir { .. } => Opcode::Mkdir,
            Self::Unlink { .. } => Opcode::Unlink,
            Self::Rmdir { .. } => Opcode::Rmdir,
            Self::Open { .. } => Opcode::Open,
            Self::Read { .. } => Opcode::Read,
            Self::Write { .. } => Opcode::Write,
            Self::Statfs => Opcode::Statfs,
            Self::Release { .. } => Opcode::Release,
            Self::Fsync { .. } => Opcode::Fsync,
            Self::Flush { .. } => Opcode::Flush,
            Self::Init(_) => Opcode::Init,
            Self::Opendir { .. } => Opcode::Opendir,
            Self::Readdir { .. } => Opcode::Readdir,
            Self::Releasedir { .. } => Opcode::Releasedir,
            Self::Fsyncdir { .. } => Opcode::Fsyncdir,
            Self::Access { .. } => Opcode::Access,
            Self::Create { .. } => Opcode::Create,
            Self::Interrupt { .. } => Opcode::Interrupt,
            Self::Destroy => Opcode::Destroy,
            Self::Unsupported { opcode } => Opcode::Unsupported(*opcode),
        }
    }

    /// Decode the body that follows `header`.
    ///
    /// Trailing bytes beyond the structures this layer knows about are
    /// ignored, since newer kernels append fields.
    pub fn decode(opcode: Opcode, body: &[u8]) -> DecodeResult<Self> {
        let mut c = Cursor::new(body);
        let op = match opcode {
            Opcode::Lookup => Self::Lookup { name: c.name()? },
            Opcode::Forget => Self::Forget { nlookup: c.u64()? },
            Opcode::BatchForget => {
                let count = c.u32()? as usize;
                c.skip(4)?;
                if count.saturating_mul(16) > c.remaining() {
                    return Err(DecodeError::Truncated {
                        needed: count.saturating_mul(16),
                        available: c.remaining(),
                    });
                }
                let mut nodes = Vec::with_capacity(count);
                for _ in 0..count {
                    nodes.push(ForgetOne {
                        nodeid: c.u64()?,
                        nlookup: c.u64()?,
                    });
                }
                Self::BatchForget { nodes }
            }
            Opcode::Getattr => {
                if c.remaining() == 0 {
                    Self::Getattr { fh: None }
                } else {
                    let getattr_flags = c.u32()?;
                    c.skip(4)?;
                    let fh = c.u64()?;
                    Self::Getattr {
                        fh: ((getattr_flags & abi::FUSE_GETATTR_FH) != 0).then_some(fh),
                    }
                }
            }
            Opcode::Setattr => {
                let valid = c.u32()?;
                c.skip(4)?;
                let fh = c.u64()?;
                let size = c.u64()?;
                let lock_owner = c.u64()?;
                let atime = c.u64()?;
                let mtime = c.u64()?;
                let ctime = c.u64()?;
                let atimensec = c.u32()?;
                let mtimensec = c.u32()?;
                let ctimensec = c.u32()?;
                let mode = c.u32()?;
                c.skip(4)?;
                let uid = c.u32()?;
                let gid = c.u32()?;
                c.skip(4)?;
                Self::Setattr(SetattrIn {
                    valid,
                    fh,
                    size,
                    lock_owner,
                    atime,
                    mtime,
                    ctime,
                    atimensec,
                    mtimensec,
                    ctimensec,
                    mode,
                    uid,
                    gid,
                })
            }
            Opcode::Readlink => Self::Readlink,
            Opcode::Mkdir => {
                let mode = c.u32()?;
                let umask = c.u32()?;
                Self::Mkdir {
                    mode,
                    umask,
                    name: c.name()?,
                }
            }
            Opcode::Unlink => Self::Unlink { name: c.name()? },
            Opcode::Rmdir => Self::Rmdir { name: c.name()? },
            Opcode::Open => {
                let flags = c.u32()?;
                c.skip(4)?;
                Self::Open { flags }
            }
            Opcode::Opendir => {
                let flags = c.u32()?;
                c.skip(4)?;
                Self::Opendir { flags }
            }
            Opcode::Read => {
                let fh = c.u64()?;
                let offset = c.u64()?;
                let size = c.u32()?;
                let read_flags = c.u32()?;
                let lock_owner = c.u64()?;
                let flags = c.u32()?;
                c.skip(4)?;
                Self::Read {
                    fh,
                    offset,
                    size,
                    read_flags,
                    lock_owner,
                    flags,
                }
            }
            Opcode::Readdir => {
                let fh = c.u64()?;
                let offset = c.u64()?;
                let size = c.u32()?;
                c.skip(20)?;
                Self::Readdir { fh, offset, size }
            }
            Opcode::Write => {
                let fh = c.u64()?;
                let offset = c.u64()?;
                let size = c.u32()? as usize;
                let write_flags = c.u32()?;
                let lock_owner = c.u64()?;
                let flags = c.u32()?;
                c.skip(4)?;
                if c.remaining() != size {
                    return Err(DecodeError::LengthMismatch {
                        declared: size,
                        actual: c.remaining(),
                    });
                }
                Self::Write {
                    fh,
                    offset,
                    write_flags,
                    lock_owner,
                    flags,
                    data: c.rest(),
                }
            }
            Opcode::Statfs => Self::Statfs,
            Opcode::Release | Opcode::Releasedir => {
                let fh = c.u64()?;
                let flags = c.u32()?;
                let release_flags = c.u32()?;
                let lock_owner = c.u64()?;
                if opcode == Opcode::Release {
                    Self::Release {
                        fh,
                        flags,
                        release_flags,
                        lock_owner,
                    }
                } else {
                    Self::Releasedir {
                        fh,
                        flags,
                        release_flags,
                        lock_owner,
                    }
                }
            }
            Opcode::Fsync | Opcode::Fsyncdir => {
                let fh = c.u64()?;
                let fsync_flags = c.u32()?;
                c.skip(4)?;
                if opcode == Opcode::Fsync {
                    Self::Fsync { fh, fsync_flags }
                } else {
                    Self::Fsyncdir { fh, fsync_flags }
                }
            }
            Opcode::Flush => {
                let fh = c.u64()?;
                c.skip(8)?;
                let lock_owner = c.u64()?;
                Self::Flush { fh, lock_owner }
            }
            Opcode::Init => Self::Init(InitIn {
                major: c.u32()?,
                minor: c.u32()?,
                max_readahead: c.u32()?,
                flags: c.u32()?,
            }),
            Opcode::Access => {
                let mask = c.u32()?;
                c.skip(4)?;
                Self::Access { mask }
            }
            Opcode::Create => {
                let flags = c.u32()?;
                let mode = c.u32()?;
                let umask = c.u32()?;
                c.skip(4)?;
                Self::Create {
                    flags,
                    mode,
                    umask,
                    name: c.name()?,
                }
            }
            Opcode::Interrupt => Self::Interrupt { unique: c.u64()? },
            Opcode::Destroy => Self::Destroy,
            Opcode::Unsupported(opcode) => Self::Unsupported { opcode },
        };
        Ok(op)
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            Self::Lookup { name } | Self::Unlink { name } | Self::Rmdir { name } => {
                put_name(out, name)
            }
            Self::Forget { nlookup } => out.put_u64_ne(*nlookup),
            Self::BatchForget { nodes } => {
                out.put_u32_ne(nodes.len() as u32);
                out.put_u32_ne(0);
                for node in nodes {
                    out.put_u64_ne(node.nodeid);
                    out.put_u64_ne(node.nlookup);
                }
            }
            Self::Getattr { fh } => {
                out.put_u32_ne(if fh.is_some() { abi::FUSE_GETATTR_FH } else { 0 });
                out.put_u32_ne(0);
                out.put_u64_ne(fh.unwrap_or(0));
            }
            Self::Setattr(s) => {
                out.put_u32_ne(s.valid);
                out.put_u32_ne(0);
                out.put_u64_ne(s.fh);
                out.put_u64_ne(s.size);
                out.put_u64_ne(s.lock_owner);
                out.put_u64_ne(s.atime);
                out.put_u64_ne(s.mtime);
                out.put_u64_ne(s.ctime);
                out.put_u32_ne(s.atimensec);
                out.put_u32_ne(s.mtimensec);
                out.put_u32_ne(s.ctimensec);
                out.put_u32_ne(s.mode);
                out.put_u32_ne(0);
                out.put_u32_ne(s.uid);
                out.put_u32_ne(s.gid);
                out.put_u32_ne(0);
            }
            Self::Mkdir { mode, umask, name } => {
                out.put_u32_ne(*mode);
                out.put_u32_ne(*umask);
                put_name(out, name);
            }
            Self::Open { flags } | Self::Opendir { flags } => {
                out.put_u32_ne(*flags);
                out.put_u32_ne(0);
            }
            Self::Read {
                fh,
                offset,
                size,
                read_flags,
                lock_owner,
                flags,
            } => {
                out.put_u64_ne(*fh);
                out.put_u64_ne(*offset);
                out.put_u32_ne(*size);
                out.put_u32_ne(*read_flags);
                out.put_u64_ne(*lock_owner);
                out.put_u32_ne(*flags);
                out.put_u32_ne(0);
            }
            Self::Readdir { fh, offset, size } => {
                out.put_u64_ne(*fh);
                out.put_u64_ne(*offset);
                out.put_u32_ne(*size);
                out.put_bytes(0, 20);
            }
            Self::Write {
                fh,
                offset,
                write_flags,
                lock_owner,
                flags,
                data,
            } => {
                out.put_u64_ne(*fh);
                out.put_u64_ne(*offset);
                out.put_u32_ne(data.len() as u32);
                out.put_u32_ne(*write_flags);
                out.put_u64_ne(*lock_owner);
                out.put_u32_ne(*flags);
                out.put_u32_ne(0);
                out.put_slice(data);
            }
            Self::Release {
                fh,
                flags,
                release_flags,
                lock_owner,
            }
            | Self::Releasedir {
                fh,
                flags,
                release_flags,
                lock_owner,
            } => {
                out.put_u64_ne(*fh);
                out.put_u32_ne(*flags);
                out.put_u32_ne(*release_flags);
                out.put_u64_ne(*lock_owner);
            }
            Self::Fsync { fh, fsync_flags } | Self::Fsyncdir { fh, fsync_flags } => {
                out.put_u64_ne(*fh);
                out.put_u32_ne(*fsync_flags);
                out.put_u32_ne(0);
            }
            Self::Flush { fh, lock_owner } => {
                out.put_u64_ne(*fh);
                out.put_u64_ne(0);
                out.put_u64_ne(*lock_owner);
            }
            Self::Init(init) => {
                out.put_u32_ne(init.major);
                out.put_u32_ne(init.minor);
                out.put_u32_ne(init.max_readahead);
                out.put_u32_ne(init.flags);
            }
            Self::Access { mask } => {
                out.put_u32_ne(*mask);
                out.put_u32_ne(0);
            }
            Self::Create {
                flags,
                mode,
                umask,
                name,
            } => {
                out.put_u32_ne(*flags);
                out.put_u32_ne(*mode);
                out.put_u32_ne(*umask);
                out.put_u32_ne(0);
                put_name(out, name);
            }
            Self::Interrupt { unique } => out.put_u64_ne(*unique),
            Self::Readlink | Self::Statfs | Self::Destroy | Self::Unsupported { .. } => {}
        }
    }
}

/// One decoded kernel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: RequestHeader,
    pub operation: Operation,
}

impl Request {
    /// Build a request; the header opcode is taken from `operation`.
    pub fn new(unique: u64, nodeid: u64, operation: Operation) -> Self {
        Self {
            header: RequestHeader {
                opcode: operation.opcode(),
                unique,
                nodeid,
                uid: 0,
                gid: 0,
                pid: 0,
            },
            operation,
        }
    }

    /// Set the caller credentials.
    pub fn with_caller(mut self, uid: u32, gid: u32, pid: u32) -> Self {
        self.header.uid = uid;
        self.header.gid = gid;
        self.header.pid = pid;
        self
    }

    pub fn unique(&self) -> u64 {
        self.header.unique
    }

    pub fn decode(buf: &[u8]) -> DecodeResult<Self> {
        let header = RequestHeader::decode(buf)?;
        let operation = Operation::decode(header.opcode, &buf[abi::IN_HEADER_SIZE..])?;
        Ok(Self { header, operation })
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        self.operation.encode_body(&mut body);
        let mut out = BytesMut::with_capacity(abi::IN_HEADER_SIZE + body.len());
        self.header.encode(body.len(), &mut out);
        out.extend_from_slice(&body);
        out.freeze()
    }
}
