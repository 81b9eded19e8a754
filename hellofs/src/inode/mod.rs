//! Kernel inode numbers and open file handles.
//!
//! The kernel addresses nodes by inode number and open files by handle; the
//! filesystem works in [`NodeId`](crate::fs::NodeId)s and its own handle
//! values. These tables translate between the two and track the reference
//! counts that decide when an entry may go away.
//!
//! ```text
//!   kernel ino ──► InodeTable ──► NodeId ──► Filesystem
//!   kernel fh  ──► HandleTable ──► (ino, NodeId, fs fh)
//! ```
//!
//! Inode numbers are never reused. An entry lives while the kernel holds
//! lookups on it or an open handle refers to it; the root (inode 1) never
//! goes away.

mod handle;
mod table;

pub use handle::{FileHandle, HandleTable};
pub use table::InodeTable;
