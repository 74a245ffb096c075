//! Memory-Bounded LRU Cache
//!
//! The primary store of a shard. Entries live in an arena of slots addressed
//! by stable handles; the dictionary maps keys to handles and each node
//! carries `prev`/`next` handles forming the recency list (head = most
//! recent, tail = least recent). Handles sidestep the aliasing traps of a
//! pointer-threaded list while keeping every operation O(1).
//!
//! Memory accounting charges `len(key) + len(value) + ENTRY_OVERHEAD` per
//! entry and guarantees `used_bytes <= max_bytes` after every call. When an
//! insert needs room, tail entries are handed to the persistent store and
//! then destroyed; a miss consults the persistent store and hydrates the
//! entry back in, which counts as a recency touch just like a hit.

use crate::cache::dict::Dict;
use crate::persist::PersistentStore;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Fixed per-entry charge covering the node, dictionary entry, and list
/// links.
pub const ENTRY_OVERHEAD: usize = 48;

/// Bytes charged against the budget for one entry.
pub fn entry_size(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

/// Errors produced by cache operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The entry cannot fit even with every other entry evicted
    #[error("entry of {size} bytes exceeds the {max_bytes} byte memory budget")]
    EntryTooLarge { size: usize, max_bytes: usize },
}

struct Node {
    key: Bytes,
    value: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

enum Slot {
    Occupied(Node),
    Vacant { next_free: Option<usize> },
}

/// A bounded in-memory KV store with least-recently-used eviction into a
/// persistent overflow store.
pub struct LruCache {
    /// key -> arena handle
    index: Dict<usize>,
    slots: Vec<Slot>,
    free_head: Option<usize>,
    /// Most recently used entry
    head: Option<usize>,
    /// Least recently used entry, next in line for eviction
    tail: Option<usize>,
    used_bytes: usize,
    max_bytes: usize,
    store: Arc<PersistentStore>,
}

impl LruCache {
    /// Creates a cache with a `max_bytes` budget that overflows into
    /// `store`.
    pub fn new(max_bytes: usize, store: Arc<PersistentStore>) -> Self {
        Self {
            index: Dict::new(),
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            used_bytes: 0,
            max_bytes,
            store,
        }
    }

    /// Number of live in-memory entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently charged against the budget.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// The configured memory budget.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Returns true if `key` is resident in memory. Does not touch recency.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.find(key).is_some()
    }

    /// Inserts or updates `key`, evicting from the tail as needed.
    pub fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), CacheError> {
        if let Some(handle) = self.index.find(&key).copied() {
            let (old_len, new_len) = {
                let node = self.node_mut(handle);
                let old = node.value.len();
                node.value = value;
                (old, node.value.len())
            };
            self.used_bytes = self.used_bytes - old_len + new_len;
            self.unlink(handle);
            self.push_front(handle);

            // A grown value can burst the budget; shed colder entries first.
            while self.used_bytes > self.max_bytes && self.tail != Some(handle) {
                if !self.evict_tail() {
                    break;
                }
            }
            if self.used_bytes > self.max_bytes {
                // Alone over budget: the entry cannot stay.
                self.unlink(handle);
                let node = self.free(handle);
                self.index.remove(&node.key);
                let size = entry_size(&node.key, &node.value);
                self.used_bytes -= size;
                return Err(CacheError::EntryTooLarge {
                    size,
                    max_bytes: self.max_bytes,
                });
            }
            return Ok(());
        }

        let size = entry_size(&key, &value);
        while self.used_bytes + size > self.max_bytes {
            if !self.evict_tail() {
                break;
            }
        }
        if self.used_bytes + size > self.max_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                max_bytes: self.max_bytes,
            });
        }

        let handle = self.alloc(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.push_front(handle);
        self.index.replace(key, handle);
        self.used_bytes += size;
        Ok(())
    }

    /// Returns the value for `key`, promoting it to most recently used.
    ///
    /// On an in-memory miss the persistent store is consulted; a hit there
    /// hydrates the entry back into the cache under the normal eviction
    /// policy (an entry too large to cache is still returned).
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        if let Some(handle) = self.index.find(key).copied() {
            self.unlink(handle);
            self.push_front(handle);
            return Some(self.node(handle).value.clone());
        }

        match self.store.get(key) {
            Ok(Some(value)) => {
                if let Err(e) = self.set(Bytes::copy_from_slice(key), value.clone()) {
                    debug!(error = %e, "Hydrated entry not cached");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Persistent store lookup failed");
                None
            }
        }
    }

    /// Removes `key` from memory and tombstones it in the persistent store.
    /// Returns whether the key was live in either place.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let removed_here = if let Some(handle) = self.index.find(key).copied() {
            self.unlink(handle);
            let node = self.free(handle);
            self.index.remove(&node.key);
            self.used_bytes -= entry_size(&node.key, &node.value);
            true
        } else {
            false
        };
        let removed_stored = self.store.remove(key);
        removed_here || removed_stored
    }

    /// Evicts the least recently used entry into the persistent store.
    /// Returns false when the cache is already empty.
    fn evict_tail(&mut self) -> bool {
        let Some(handle) = self.tail else {
            return false;
        };

        // Hand the entry over before destroying it; persistence is
        // best-effort, the eviction happens regardless.
        {
            let node = self.node(handle);
            if let Err(e) = self.store.insert(&node.key, &node.value) {
                warn!(error = %e, "Evicted entry could not be persisted");
            }
        }

        self.unlink(handle);
        let node = self.free(handle);
        self.index.remove(&node.key);
        self.used_bytes -= entry_size(&node.key, &node.value);
        debug!(used_bytes = self.used_bytes, "Evicted least recently used entry");
        true
    }

    fn push_front(&mut self, handle: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(handle);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            self.node_mut(h).prev = Some(handle);
        }
        self.head = Some(handle);
        if self.tail.is_none() {
            self.tail = Some(handle);
        }
    }

    fn unlink(&mut self, handle: usize) {
        let (prev, next) = {
            let node = self.node(handle);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let node = self.node_mut(handle);
        node.prev = None;
        node.next = None;
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free_head {
            Some(idx) => {
                let next_free = match &self.slots[idx] {
                    Slot::Vacant { next_free } => *next_free,
                    Slot::Occupied(_) => unreachable!("free list points at occupied slot"),
                };
                self.free_head = next_free;
                self.slots[idx] = Slot::Occupied(node);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(node));
                self.slots.len() - 1
            }
        }
    }

    fn free(&mut self, handle: usize) -> Node {
        let slot = std::mem::replace(
            &mut self.slots[handle],
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(handle);
        match slot {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("double free of cache slot"),
        }
    }

    fn node(&self, handle: usize) -> &Node {
        match &self.slots[handle] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("stale cache handle"),
        }
    }

    fn node_mut(&mut self, handle: usize) -> &mut Node {
        match &mut self.slots[handle] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("stale cache handle"),
        }
    }
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("entries", &self.len())
            .field("used_bytes", &self.used_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
