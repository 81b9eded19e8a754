//! Inode number ↔ node mapping with lookup counts.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::fs::NodeId;
use crate::wire::abi::ROOT_ID;

#[derive(Debug)]
struct InodeEntry {
    node: NodeId,
    /// LOOKUP replies not yet balanced by FORGET.
    lookups: u64,
    /// Open handles referring to this inode.
    handles: u64,
}

impl InodeEntry {
    fn is_unreferenced(&self) -> bool {
        self.lookups == 0 && self.handles == 0
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<u64, InodeEntry>,
    by_node: HashMap<NodeId, u64>,
    next_ino: u64,
}

impl Inner {
    fn evict_if_unreferenced(&mut self, ino: u64) -> Option<NodeId> {
        if ino == ROOT_ID {
            return None;
        }
        let unreferenced = self.entries.get(&ino)?.is_unreferenced();
        if !unreferenced {
            return None;
        }
        let entry = self.entries.remove(&ino)?;
        self.by_node.remove(&entry.node);
        Some(entry.node)
    }
}

/// Thread-safe inode table.
///
/// Each mutating operation takes the lock once, so counts never race with
/// eviction.
#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Create a table holding only the pinned root.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        let mut by_node = HashMap::new();
        entries.insert(
            ROOT_ID,
            InodeEntry {
                node: NodeId::ROOT,
                lookups: 1,
                handles: 0,
            },
        );
        by_node.insert(NodeId::ROOT, ROOT_ID);
        Self {
            inner: Mutex::new(Inner {
                entries,
                by_node,
                next_ino: ROOT_ID + 1,
            }),
        }
    }

    /// Record one kernel lookup of `node` and return its inode number.
    ///
    /// The first lookup assigns a fresh number; later ones reuse it while the
    /// entry is alive.
    pub fn lookup(&self, node: NodeId) -> u64 {
        let mut inner = self.inner.lock();
        if let Some(&ino) = inner.by_node.get(&node) {
            if let Some(entry) = inner.entries.get_mut(&ino) {
                if ino != ROOT_ID {
                    entry.lookups = entry.lookups.saturating_add(1);
                }
                return ino;
            }
        }
        let ino = inner.next_ino;
        inner.next_ino += 1;
        inner.entries.insert(
            ino,
            InodeEntry {
                node,
                lookups: 1,
                handles: 0,
            },
        );
        inner.by_node.insert(node, ino);
        ino
    }

    /// Node behind a live inode number.
    pub fn resolve(&self, ino: u64) -> Option<NodeId> {
        self.inner.lock().entries.get(&ino).map(|entry| entry.node)
    }

    /// Inode number currently assigned to `node`, if any.
    pub fn inode_of(&self, node: NodeId) -> Option<u64> {
        self.inner.lock().by_node.get(&node).copied()
    }

    pub fn lookup_count(&self, ino: u64) -> Option<u64> {
        self.inner.lock().entries.get(&ino).map(|entry| entry.lookups)
    }

    /// Drop `count` lookups from `ino`.
    ///
    /// Returns the evicted node when the entry became unreferenced. Unknown
    /// inodes and the root are ignored.
    pub fn forget(&self, ino: u64, count: u64) -> Option<NodeId> {
        if ino == ROOT_ID {
            return None;
        }
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&ino)?;
        entry.lookups = entry.lookups.saturating_sub(count);
        inner.evict_if_unreferenced(ino)
    }

    /// Pin `ino` for an open handle. Returns its node, or `None` if the
    /// inode is unknown.
    pub fn acquire_handle(&self, ino: u64) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&ino)?;
        entry.handles += 1;
        Some(entry.node)
    }

    /// Unpin `ino` after a handle was released.
    ///
    /// Returns the evicted node when that was the last reference.
    pub fn release_handle(&self, ino: u64) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(&ino)?;
        entry.handles = entry.handles.saturating_sub(1);
        inner.evict_if_unreferenced(ino)
    }

    /// Number of live entries, root included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
