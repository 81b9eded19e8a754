//! FUSE wire protocol codec.
//!
//! Decodes kernel requests and encodes replies in the kernel's native byte
//! order and fixed-width layout. This is the one bit-exact compatibility
//! surface of the crate: any deviation from `include/uapi/linux/fuse.h`
//! breaks interoperability with the kernel driver.
//!
//! # Message Layout
//!
//! ```text
//! request:  ┌──────────── 40-byte header ────────────┐┌── body ──┐
//!           │ len │ opcode │ unique │ nodeid │ uid gid pid pad ││ per-op   │
//!           └─────────────────────────────────────────┘└──────────┘
//!
//! reply:    ┌───── 16-byte header ─────┐┌── body (error == 0 only) ──┐
//!           │ len │ -errno │ unique    ││ per-op                     │
//!           └──────────────────────────┘└────────────────────────────┘
//! ```
//!
//! Unknown opcodes decode to [`Operation::Unsupported`] so the dispatcher can
//! answer `ENOSYS` instead of tearing the session down.

pub mod abi;
mod cursor;
mod dirent;
mod errno;
mod reply;
mod request;

use thiserror::Error;

pub use abi::Opcode;
pub use dirent::{parse_dirents, Dirent, DirentBuf};
pub use errno::Errno;
pub use reply::{Attr, AttrOut, EntryOut, InitOut, OpenOut, Reply, ReplyBody, StatfsOut};
pub use request::{ForgetOne, InitIn, Operation, Request, RequestHeader, SetattrIn};

/// Result type for codec operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors raised while decoding a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer bytes than a field or structure needs.
    #[error("truncated message: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Declared length disagrees with the bytes actually received.
    #[error("length mismatch: declared {declared}, received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// A name field without its NUL terminator.
    #[error("name is not NUL-terminated")]
    MissingNul,

    /// Structurally invalid content.
    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;
    use std::ffi::OsString;

    fn name_strategy() -> impl Strategy<Value = OsString> {
        "[a-zA-Z0-9._-]{1,32}".prop_map(OsString::from)
    }

    fn operation_strategy() -> impl Strategy<Value = Operation> {
        prop_oneof![
            name_strategy().prop_map(|name| Operation::Lookup { name }),
            any::<u64>().prop_map(|nlookup| Operation::Forget { nlookup }),
            prop::collection::vec((any::<u64>(), any::<u64>()), 0..8).prop_map(|nodes| {
                Operation::BatchForget {
                    nodes: nodes
                        .into_iter()
                        .map(|(nodeid, nlookup)| ForgetOne { nodeid, nlookup })
                        .collect(),
                }
            }),
            any::<Option<u64>>().prop_map(|fh| Operation::Getattr { fh }),
            (any::<u32>(), any::<u64>(), any::<u64>(), any::<u32>()).prop_map(
                |(valid, fh, size, mode)| Operation::Setattr(SetattrIn {
                    valid,
                    fh,
                    size,
                    mode,
                    ..SetattrIn::default()
                })
            ),
            (any::<u32>(), any::<u32>(), name_strategy())
                .prop_map(|(mode, umask, name)| Operation::Mkdir { mode, umask, name }),
            any::<u32>().prop_map(|flags| Operation::Open { flags }),
            (any::<u64>(), any::<u64>(), any::<u32>(), any::<u32>()).prop_map(
                |(fh, offset, size, flags)| Operation::Read {
                    fh,
                    offset,
                    size,
                    read_flags: 0,
                    lock_owner: 0,
                    flags,
                }
            ),
            (any::<u64>(), any::<u64>(), prop::collection::vec(any::<u8>(), 0..256)).prop_map(
                |(fh, offset, data)| Operation::Write {
                    fh,
                    offset,
                    write_flags: 0,
                    lock_owner: 0,
                    flags: 0,
                    data: Bytes::from(data),
                }
            ),
            (any::<u64>(), any::<u32>(), any::<u64>()).prop_map(|(fh, flags, lock_owner)| {
                Operation::Release {
                    fh,
                    flags,
                    release_flags: 0,
                    lock_owner,
                }
            }),
            (any::<u64>(), any::<u64>(), any::<u32>())
                .prop_map(|(fh, offset, size)| Operation::Readdir { fh, offset, size }),
            (any::<u32>(), any::<u32>(), any::<u32>(), name_strategy()).prop_map(
                |(flags, mode, umask, name)| Operation::Create {
                    flags,
                    mode,
                    umask,
                    name,
                }
            ),
            any::<u64>().prop_map(|unique| Operation::Interrupt { unique }),
            (any::<u32>(), any::<u32>()).prop_map(|(minor, flags)| Operation::Init(InitIn {
                major: 7,
                minor,
                max_readahead: 131072,
                flags,
            })),
            Just(Operation::Statfs),
            Just(Operation::Destroy),
            (100u32..4000).prop_map(|opcode| Operation::Unsupported { opcode }),
        ]
    }

    fn attr_strategy() -> impl Strategy<Value = Attr> {
        (any::<u64>(), any::<u64>(), any::<u32>(), any::<u32>()).prop_map(
            |(ino, size, mode, nlink)| Attr {
                ino,
                size,
                mode,
                nlink,
                blksize: 4096,
                ..Attr::default()
            },
        )
    }

    fn reply_strategy() -> impl Strategy<Value = (Opcode, ReplyBody)> {
        prop_oneof![
            (any::<u64>(), any::<u64>(), attr_strategy()).prop_map(|(nodeid, valid, attr)| {
                (
                    Opcode::Lookup,
                    ReplyBody::Entry(EntryOut {
                        nodeid,
                        attr_valid: valid,
                        entry_valid: valid,
                        attr,
                        ..EntryOut::default()
                    }),
                )
            }),
            attr_strategy().prop_map(|attr| {
                (
                    Opcode::Getattr,
                    ReplyBody::Attr(AttrOut {
                        attr_valid: 1,
                        attr_valid_nsec: 0,
                        attr,
                    }),
                )
            }),
            (any::<u64>(), any::<u32>())
                .prop_map(|(fh, open_flags)| (Opcode::Open, ReplyBody::Open(OpenOut { fh, open_flags }))),
            any::<u32>().prop_map(|size| (Opcode::Write, ReplyBody::Write { size })),
            prop::collection::vec(any::<u8>(), 0..512)
                .prop_map(|data| (Opcode::Read, ReplyBody::Data(Bytes::from(data)))),
            (23u32..64, any::<u32>(), any::<u16>()).prop_map(|(minor, flags, max_pages)| {
                (
                    Opcode::Init,
                    ReplyBody::Init(InitOut {
                        major: 7,
                        minor,
                        max_readahead: 65536,
                        flags,
                        max_background: 12,
                        congestion_threshold: 9,
                        max_write: 131072,
                        time_gran: 1,
                        max_pages,
                    }),
                )
            }),
            Just((Opcode::Release, ReplyBody::Empty)),
        ]
    }

    proptest! {
        #[test]
        fn test_request_roundtrip(
            unique in any::<u64>(),
            nodeid in any::<u64>(),
            uid in any::<u32>(),
            operation in operation_strategy(),
        ) {
            let request = Request::new(unique, nodeid, operation).with_caller(uid, uid, 1);
            let decoded = Request::decode(&request.encode());
            prop_assert_eq!(decoded, Ok(request));
        }

        #[test]
        fn test_reply_roundtrip(unique in any::<u64>(), (opcode, body) in reply_strategy()) {
            let reply = Reply::ok(unique, body);
            let decoded = Reply::decode(&reply.encode(), opcode);
            prop_assert_eq!(decoded, Ok(reply));
        }

        #[test]
        fn test_error_reply_roundtrip(unique in any::<u64>(), code in 1i32..200) {
            let reply = Reply::error(unique, Errno::new(code));
            let decoded = Reply::decode(&reply.encode(), Opcode::Lookup);
            prop_assert_eq!(decoded, Ok(reply));
        }

        #[test]
        fn test_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = Request::decode(&data);
        }
    }
}
