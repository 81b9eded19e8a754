//! Bounds-checked field readers and writers.
//!
//! Every fixed-width field is read through [`Cursor`], which checks the
//! remaining length before delegating to [`bytes::Buf`]. Nothing in the codec
//! reinterprets raw memory.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{DecodeError, DecodeResult};

/// Read cursor over one message body.
pub struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> DecodeResult<()> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u16(&mut self) -> DecodeResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_ne())
    }

    pub fn u32(&mut self) -> DecodeResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_ne())
    }

    pub fn i32(&mut self) -> DecodeResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_ne())
    }

    pub fn u64(&mut self) -> DecodeResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_ne())
    }

    pub fn skip(&mut self, len: usize) -> DecodeResult<()> {
        self.need(len)?;
        self.buf.advance(len);
        Ok(())
    }

    /// Take exactly `len` bytes.
    pub fn bytes(&mut self, len: usize) -> DecodeResult<Bytes> {
        self.need(len)?;
        Ok(self.buf.copy_to_bytes(len))
    }

    /// Take everything left.
    pub fn rest(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.copy_to_bytes(len)
    }

    /// Take a NUL-terminated name.
    pub fn name(&mut self) -> DecodeResult<OsString> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::MissingNul)?;
        let name = self.buf[..end].to_vec();
        self.buf.advance(end + 1);
        if name.is_empty() {
            return Err(DecodeError::Invalid("empty name"));
        }
        Ok(OsString::from_vec(name))
    }
}

/// Append a NUL-terminated name.
pub fn put_name(out: &mut BytesMut, name: &std::ffi::OsStr) {
    use std::os::unix::ffi::OsStrExt;
    out.put_slice(name.as_bytes());
    out.put_u8(0);
}

/// Zero bytes needed to pad `len` to an 8-byte boundary.
pub fn padding_to_8(len: usize) -> usize {
    (8 - (len % 8)) % 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_read_reports_sizes() {
        let data = [1u8, 2, 3];
        let mut cursor = Cursor::new(&data);
        match cursor.u32() {
            Err(DecodeError::Truncated { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_name_requires_terminator() {
        let mut cursor = Cursor::new(b"hello");
        assert!(matches!(cursor.name(), Err(DecodeError::MissingNul)));

        let mut cursor = Cursor::new(b"hello\0rest");
        assert_eq!(cursor.name().unwrap(), OsString::from("hello"));
        assert_eq!(cursor.remaining(), 4);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut cursor = Cursor::new(b"\0");
        assert!(matches!(cursor.name(), Err(DecodeError::Invalid(_))));
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_to_8(0), 0);
        assert_eq!(padding_to_8(5), 3);
        assert_eq!(padding_to_8(8), 0);
        assert_eq!(padding_to_8(29), 3);
    }
}
