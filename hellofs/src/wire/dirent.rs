//! READDIR payload packing.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use bytes::{BufMut, Bytes, BytesMut};

use super::abi;
use super::cursor::{padding_to_8, Cursor};
use super::DecodeResult;

/// One `struct fuse_dirent` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: u64,
    /// Offset of the *next* entry, passed back in the following READDIR.
    pub offset: u64,
    /// `DT_*` type, i.e. `(mode & S_IFMT) >> 12`.
    pub kind: u32,
    pub name: OsString,
}

/// Size-bounded directory listing buffer.
///
/// The kernel states how many bytes it can take; entries that would overflow
/// are refused so the caller can stop and resume at that offset next time.
pub struct DirentBuf {
    buf: BytesMut,
    max_size: usize,
}

impl DirentBuf {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_size.min(64 * 1024)),
            max_size,
        }
    }

    /// Append an entry. Returns `false` (and appends nothing) when full.
    pub fn push(&mut self, ino: u64, offset: u64, kind: u32, name: &OsStr) -> bool {
        let name = name.as_bytes();
        let record = abi::DIRENT_HEADER_SIZE + name.len();
        let padded = record + padding_to_8(record);
        if self.buf.len() + padded > self.max_size {
            return false;
        }
        self.buf.put_u64_ne(ino);
        self.buf.put_u64_ne(offset);
        self.buf.put_u32_ne(name.len() as u32);
        self.buf.put_u32_ne(kind);
        self.buf.put_slice(name);
        self.buf.put_bytes(0, padded - record);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Parse a READDIR payload back into records.
pub fn parse_dirents(data: &[u8]) -> DecodeResult<Vec<Dirent>> {
    let mut c = Cursor::new(data);
    let mut entries = Vec::new();
    while c.remaining() > 0 {
        let ino = c.u64()?;
        let offset = c.u64()?;
        let namelen = c.u32()? as usize;
        let kind = c.u32()?;
        let name = c.bytes(namelen)?;
        c.skip(padding_to_8(abi::DIRENT_HEADER_SIZE + namelen))?;
        entries.push(Dirent {
            ino,
            offset,
            kind,
            name: OsString::from_vec(name.to_vec()),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_padded_to_eight_bytes() {
        let mut buf = DirentBuf::new(4096);
        assert!(buf.push(1, 1, libc::DT_DIR as u32, OsStr::new(".")));
        assert!(buf.push(2, 2, libc::DT_REG as u32, OsStr::new("hello")));
        let data = buf.finish();

        // 24 + 1 -> 32, 24 + 5 -> 32
        assert_eq!(data.len(), 64);

        let entries = parse_dirents(&data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, OsString::from("hello"));
        assert_eq!(entries[1].kind, libc::DT_REG as u32);
        assert_eq!(entries[1].offset, 2);
    }

    #[test]
    fn test_push_refuses_overflow() {
        let mut buf = DirentBuf::new(40);
        assert!(buf.push(1, 1, 0, OsStr::new("a")));
        assert!(!buf.push(2, 2, 0, OsStr::new("b")));
        assert_eq!(buf.finish().len(), 32);
    }

    #[test]
    fn test_too_small_for_anything() {
        let mut buf = DirentBuf::new(10);
        assert!(!buf.push(1, 1, 0, OsStr::new("a")));
        assert!(buf.is_empty());
    }
}
