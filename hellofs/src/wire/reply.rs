//! User space → kernel messages.

use bytes::{BufMut, Bytes, BytesMut};

use super::abi::{self, Opcode};
use super::cursor::Cursor;
use super::errno::Errno;
use super::{DecodeError, DecodeResult};

/// `struct fuse_attr` (Linux layout).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    pub flags: u32,
}

impl Attr {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_ne(self.ino);
        out.put_u64_ne(self.size);
        out.put_u64_ne(self.blocks);
        out.put_u64_ne(self.atime);
        out.put_u64_ne(self.mtime);
        out.put_u64_ne(self.ctime);
        out.put_u32_ne(self.atimensec);
        out.put_u32_ne(self.mtimensec);
        out.put_u32_ne(self.ctimensec);
        out.put_u32_ne(self.mode);
        out.put_u32_ne(self.nlink);
        out.put_u32_ne(self.uid);
        out.put_u32_ne(self.gid);
        out.put_u32_ne(self.rdev);
        out.put_u32_ne(self.blksize);
        out.put_u32_ne(self.flags);
    }

    fn decode(c: &mut Cursor<'_>) -> DecodeResult<Self> {
        Ok(Self {
            ino: c.u64()?,
            size: c.u64()?,
            blocks: c.u64()?,
            atime: c.u64()?,
            mtime: c.u64()?,
            ctime: c.u64()?,
            atimensec: c.u32()?,
            mtimensec: c.u32()?,
            ctimensec: c.u32()?,
            mode: c.u32()?,
            nlink: c.u32()?,
            uid: c.u32()?,
            gid: c.u32()?,
            rdev: c.u32()?,
            blksize: c.u32()?,
            flags: c.u32()?,
        })
    }
}

/// LOOKUP / MKDIR / CREATE reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOut {
    pub nodeid: u64,
    pub generation: u64,
    pub entry_valid: u64,
    pub attr_valid: u64,
    pub entry_valid_nsec: u32,
    pub attr_valid_nsec: u32,
    pub attr: Attr,
}

impl EntryOut {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_ne(self.nodeid);
        out.put_u64_ne(self.generation);
        out.put_u64_ne(self.entry_valid);
        out.put_u64_ne(self.attr_valid);
        out.put_u32_ne(self.entry_valid_nsec);
        out.put_u32_ne(self.attr_valid_nsec);
        self.attr.encode(out);
    }

    fn decode(c: &mut Cursor<'_>) -> DecodeResult<Self> {
        Ok(Self {
            nodeid: c.u64()?,
            generation: c.u64()?,
            entry_valid: c.u64()?,
            attr_valid: c.u64()?,
            entry_valid_nsec: c.u32()?,
            attr_valid_nsec: c.u32()?,
            attr: Attr::decode(c)?,
        })
    }
}

/// GETATTR / SETATTR reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttrOut {
    pub attr_valid: u64,
    pub attr_valid_nsec: u32,
    pub attr: Attr,
}

/// OPEN / OPENDIR reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOut {
    pub fh: u64,
    pub open_flags: u32,
}

impl OpenOut {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u64_ne(self.fh);
        out.put_u32_ne(self.open_flags);
        out.put_u32_ne(0);
    }

    fn decode(c: &mut Cursor<'_>) -> DecodeResult<Self> {
        let fh = c.u64()?;
        let open_flags = c.u32()?;
        c.skip(4)?;
        Ok(Self { fh, open_flags })
    }
}

/// STATFS reply (`struct fuse_kstatfs`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatfsOut {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// INIT reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitOut {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: u32,
    pub max_background: u16,
    pub congestion_threshold: u16,
    pub max_write: u32,
    /// Only sent to kernels speaking 7.23 or later.
    pub time_gran: u32,
    /// Only sent to kernels speaking 7.23 or later.
    pub max_pages: u16,
}

/// Opcode-specific success payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Empty,
    Entry(EntryOut),
    Attr(AttrOut),
    Open(OpenOut),
    Create(EntryOut, OpenOut),
    Write { size: u32 },
    Statfs(StatfsOut),
    Init(InitOut),
    /// READ, READLINK and READDIR payloads.
    Data(Bytes),
}

impl ReplyBody {
    fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Empty => {}
            Self::Entry(entry) => entry.encode(out),
            Self::Attr(attr) => {
                out.put_u64_ne(attr.attr_valid);
                out.put_u32_ne(attr.attr_valid_nsec);
                out.put_u32_ne(0);
                attr.attr.encode(out);
            }
            Self::Open(open) => open.encode(out),
            Self::Create(entry, open) => {
                entry.encode(out);
                open.encode(out);
            }
            Self::Write { size } => {
                out.put_u32_ne(*size);
                out.put_u32_ne(0);
            }
            Self::Statfs(st) => {
                out.put_u64_ne(st.blocks);
                out.put_u64_ne(st.bfree);
                out.put_u64_ne(st.bavail);
                out.put_u64_ne(st.files);
                out.put_u64_ne(st.ffree);
                out.put_u32_ne(st.bsize);
                out.put_u32_ne(st.namelen);
                out.put_u32_ne(st.frsize);
                // padding + spare[6]
                out.put_bytes(0, 28);
            }
            Self::Init(init) => {
                out.put_u32_ne(init.major);
                out.put_u32_ne(init.minor);
                out.put_u32_ne(init.max_readahead);
                out.put_u32_ne(init.flags);
                out.put_u16_ne(init.max_background);
                out.put_u16_ne(init.congestion_threshold);
                out.put_u32_ne(init.max_write);
                if init.minor >= abi::INIT_OUT_FULL_MINOR {
                    out.put_u32_ne(init.time_gran);
                    out.put_u16_ne(init.max_pages);
                    // map_alignment, flags2, unused[7]
                    out.put_bytes(0, abi::INIT_OUT_SIZE - abi::INIT_OUT_COMPAT_SIZE - 6);
                }
            }
            Self::Data(data) => out.put_slice(data),
        }
    }

    /// Decode a success payload for a request with `opcode`.
    pub fn decode(opcode: Opcode, body: &[u8]) -> DecodeResult<Self> {
        let mut c = Cursor::new(body);
        let reply = match opcode {
            Opcode::Lookup | Opcode::Mkdir => Self::Entry(EntryOut::decode(&mut c)?),
            Opcode::Getattr | Opcode::Setattr => {
                let attr_valid = c.u64()?;
                let attr_valid_nsec = c.u32()?;
                c.skip(4)?;
                Self::Attr(AttrOut {
                    attr_valid,
                    attr_valid_nsec,
                    attr: Attr::decode(&mut c)?,
                })
            }
            Opcode::Open | Opcode::Opendir => Self::Open(OpenOut::decode(&mut c)?),
            Opcode::Create => {
                let entry = EntryOut::decode(&mut c)?;
                Self::Create(entry, OpenOut::decode(&mut c)?)
            }
            Opcode::Write => {
                let size = c.u32()?;
                c.skip(4)?;
                Self::Write { size }
            }
            Opcode::Statfs => {
                let st = StatfsOut {
                    blocks: c.u64()?,
                    bfree: c.u64()?,
                    bavail: c.u64()?,
                    files: c.u64()?,
                    ffree: c.u64()?,
                    bsize: c.u32()?,
                    namelen: c.u32()?,
                    frsize: c.u32()?,
                };
                c.skip(28)?;
                Self::Statfs(st)
            }
            Opcode::Init => {
                let mut init = InitOut {
                    major: c.u32()?,
                    minor: c.u32()?,
                    max_readahead: c.u32()?,
                    flags: c.u32()?,
                    max_background: c.u16()?,
                    congestion_threshold: c.u16()?,
                    max_write: c.u32()?,
                    ..InitOut::default()
                };
                if c.remaining() > 0 {
                    init.time_gran = c.u32()?;
                    init.max_pages = c.u16()?;
                    c.skip(abi::INIT_OUT_SIZE - abi::INIT_OUT_COMPAT_SIZE - 6)?;
                }
                Self::Init(init)
            }
            Opcode::Read | Opcode::Readlink | Opcode::Readdir => Self::Data(c.rest()),
            _ => Self::Empty,
        };
        if c.remaining() != 0 {
            return Err(DecodeError::Invalid("trailing bytes in reply"));
        }
        Ok(reply)
    }
}

/// Response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub unique: u64,
    pub result: Result<ReplyBody, Errno>,
}

impl Reply {
    pub fn ok(unique: u64, body: ReplyBody) -> Self {
        Self {
            unique,
            result: Ok(body),
        }
    }

    pub fn error(unique: u64, errno: Errno) -> Self {
        Self {
            unique,
            result: Err(errno),
        }
    }

    /// Encode header and body into one buffer so it goes out in a single
    /// write.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        let error = match &self.result {
            Ok(reply) => {
                reply.encode(&mut body);
                0
            }
            Err(errno) => errno.to_wire(),
        };
        let mut out = BytesMut::with_capacity(abi::OUT_HEADER_SIZE + body.len());
        out.put_u32_ne((abi::OUT_HEADER_SIZE + body.len()) as u32);
        out.put_i32_ne(error);
        out.put_u64_ne(self.unique);
        out.extend_from_slice(&body);
        out.freeze()
    }

    /// Decode a reply to a request with `opcode`.
    pub fn decode(buf: &[u8], opcode: Opcode) -> DecodeResult<Self> {
        let mut c = Cursor::new(buf);
        let len = c.u32()? as usize;
        if len != buf.len() {
            return Err(DecodeError::LengthMismatch {
                declared: len,
                actual: buf.len(),
            });
        }
        let error = c.i32()?;
        let unique = c.u64()?;
        let body = &buf[abi::OUT_HEADER_SIZE..];
        let result = match Errno::from_wire(error) {
            Some(errno) => {
                if !body.is_empty() {
                    return Err(DecodeError::Invalid("error reply with a body"));
                }
                Err(errno)
            }
            None => Ok(ReplyBody::decode(opcode, body)?),
        };
        Ok(Self { unique, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_out(minor: u32) -> InitOut {
        InitOut {
            major: 7,
            minor,
            max_readahead: 128 * 1024,
            flags: abi::FUSE_ASYNC_READ | abi::FUSE_BIG_WRITES,
            max_background: 12,
            congestion_threshold: 9,
            max_write: 128 * 1024,
            time_gran: 0,
            max_pages: 0,
        }
    }

    #[test]
    fn test_error_reply_is_header_only() {
        let bytes = Reply::error(77, Errno::ENOSYS).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE);
        assert_eq!(&bytes[4..8], &(-libc::ENOSYS).to_ne_bytes());
        assert_eq!(&bytes[8..16], &77u64.to_ne_bytes());
    }

    #[test]
    fn test_error_reply_decodes_errno() {
        let reply = Reply::decode(&Reply::error(5, Errno::ENOENT).encode(), Opcode::Lookup).unwrap();
        assert_eq!(reply.result, Err(Errno::ENOENT));
    }

    #[test]
    fn test_entry_reply_size() {
        let bytes = Reply::ok(1, ReplyBody::Entry(EntryOut::default())).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE + abi::ENTRY_OUT_SIZE);
    }

    #[test]
    fn test_attr_and_statfs_reply_sizes() {
        let bytes = Reply::ok(1, ReplyBody::Attr(AttrOut::default())).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE + abi::ATTR_OUT_SIZE);

        let bytes = Reply::ok(1, ReplyBody::Statfs(StatfsOut::default())).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE + abi::STATFS_OUT_SIZE);
    }

    #[test]
    fn test_init_reply_full_layout() {
        let bytes = Reply::ok(1, ReplyBody::Init(init_out(31))).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE + abi::INIT_OUT_SIZE);
    }

    #[test]
    fn test_init_reply_compat_layout_for_old_kernels() {
        let bytes = Reply::ok(1, ReplyBody::Init(init_out(22))).encode();
        assert_eq!(bytes.len(), abi::OUT_HEADER_SIZE + abi::INIT_OUT_COMPAT_SIZE);

        let decoded = Reply::decode(&bytes, Opcode::Init).unwrap();
        assert_eq!(decoded.result, Ok(ReplyBody::Init(init_out(22))));
    }

    #[test]
    fn test_reply_length_mismatch() {
        let mut bytes = Reply::ok(3, ReplyBody::Empty).encode().to_vec();
        bytes.push(0);
        assert!(matches!(
            Reply::decode(&bytes, Opcode::Flush),
            Err(DecodeError::LengthMismatch { .. })
        ));
    }
}
