//! Session-owned open file handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::fs::NodeId;

/// What a kernel-visible handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    pub ino: u64,
    pub node: NodeId,
    /// Value the filesystem returned from open/opendir/create.
    pub fs_fh: u64,
    pub is_dir: bool,
}

/// Allocates handles between OPEN and RELEASE.
///
/// Handles come from a counter starting at 1 and are never reused within a
/// session.
#[derive(Debug)]
pub struct HandleTable {
    handles: Mutex<HashMap<u64, FileHandle>>,
    next: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Register an open handle and return the value handed to the kernel.
    pub fn insert(&self, handle: FileHandle) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(fh, handle);
        fh
    }

    pub fn get(&self, fh: u64) -> Option<FileHandle> {
        self.handles.lock().get(&fh).copied()
    }

    pub fn remove(&self, fh: u64) -> Option<FileHandle> {
        self.handles.lock().remove(&fh)
    }

    /// Remove every handle, in handle order.
    pub fn drain(&self) -> Vec<(u64, FileHandle)> {
        let mut handles: Vec<_> = self.handles.lock().drain().collect();
        handles.sort_unstable_by_key(|(fh, _)| *fh);
        handles
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(ino: u64) -> FileHandle {
        FileHandle {
            ino,
            node: NodeId(ino * 10),
            fs_fh: 99,
            is_dir: false,
        }
    }

    #[test]
    fn test_handles_start_at_one() {
        let table = HandleTable::new();
        assert_eq!(table.insert(handle(2)), 1);
        assert_eq!(table.insert(handle(3)), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_frees_without_reuse() {
        let table = HandleTable::new();
        let fh = table.insert(handle(2));
        assert_eq!(table.get(fh), Some(handle(2)));
        assert_eq!(table.remove(fh), Some(handle(2)));
        assert_eq!(table.get(fh), None);
        assert_eq!(table.remove(fh), None);
        assert_ne!(table.insert(handle(2)), fh);
    }

    #[test]
    fn test_drain() {
        let table = HandleTable::new();
        table.insert(handle(2));
        table.insert(handle(3));
        assert_eq!(table.drain(), vec![(1, handle(2)), (2, handle(3))]);
        assert!(table.is_empty());
    }
}
