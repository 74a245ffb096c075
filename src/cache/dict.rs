//! Chained Hash Dictionary with Incremental Rehash
//!
//! The index behind the LRU cache. Collisions are resolved by separate
//! chaining; resizing never happens in one stop-the-world pass. Instead the
//! dictionary keeps two tables: inserts trigger an expansion when the load
//! factor reaches 1, after which every mutating call migrates a bounded
//! amount of chains from the old table to the new one until the old table
//! drains and the new table takes its place.
//!
//! During a rehash:
//!
//! - lookups consult the old table first, then the new one
//! - inserts go to the new table, so the old table only ever shrinks
//! - each migration step skips at most `10 * n` empty buckets, bounding the
//!   latency added to any single operation
//!
//! Table sizes are powers of two so the bucket index is `hash & (size - 1)`.

use bytes::Bytes;
use std::hash::{DefaultHasher, Hash, Hasher};
use thiserror::Error;

/// Initial bucket count for the first table
const INITIAL_SIZE: usize = 4;

/// Load factor at which a forced expansion happens even with resizing disabled
const FORCED_RESIZE_RATIO: usize = 5;

/// Errors produced by dictionary operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DictError {
    /// `add` was called for a key that is already present
    #[error("key already present")]
    DuplicateKey,
}

type Link<V> = Option<Box<ChainEntry<V>>>;

/// One entry in a bucket chain.
struct ChainEntry<V> {
    key: Bytes,
    val: V,
    next: Link<V>,
}

/// A single hash table: a bucket array of chain heads plus its entry count.
struct Table<V> {
    buckets: Vec<Link<V>>,
    used: usize,
}

impl<V> Table<V> {
    fn empty() -> Self {
        Self {
            buckets: Vec::new(),
            used: 0,
        }
    }

    fn with_size(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        Self { buckets, used: 0 }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket index mask; only valid for allocated tables.
    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }
}

/// A hash dictionary mapping byte-string keys to values of type `V`.
pub struct Dict<V> {
    /// `ht[1]` is allocated only while a rehash is migrating `ht[0]` into it
    ht: [Table<V>; 2],
    /// Next `ht[0]` bucket to migrate; `None` when no rehash is in progress
    rehash_idx: Option<usize>,
    can_resize: bool,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    /// Creates an empty dictionary. No buckets are allocated until the first
    /// insert.
    pub fn new() -> Self {
        Self {
            ht: [Table::empty(), Table::empty()],
            rehash_idx: None,
            can_resize: true,
        }
    }

    /// Enables or disables automatic resizing. While disabled, an expansion
    /// still happens once the load factor reaches the forced threshold.
    pub fn enable_resize(&mut self, enable: bool) {
        self.can_resize = enable;
    }

    /// Number of live entries across both tables.
    pub fn len(&self) -> usize {
        self.ht[0].used + self.ht[1].used
    }

    /// Returns true if the dictionary holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total allocated bucket count (both tables during a rehash).
    pub fn bucket_count(&self) -> usize {
        self.ht[0].size() + self.ht[1].size()
    }

    /// Returns true while entries are still migrating between tables.
    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    /// Inserts a new key. Fails with [`DictError::DuplicateKey`] if the key
    /// is already present.
    pub fn add(&mut self, key: Bytes, val: V) -> Result<(), DictError> {
        self.expand_if_needed();
        if self.is_rehashing() {
            self.rehash_step(1);
        }

        if self.find(&key).is_some() {
            return Err(DictError::DuplicateKey);
        }

        let target = if self.is_rehashing() { 1 } else { 0 };
        let idx = (Self::hash_key(&key) as usize) & self.ht[target].mask();
        let head = self.ht[target].buckets[idx].take();
        self.ht[target].buckets[idx] = Some(Box::new(ChainEntry {
            key,
            val,
            next: head,
        }));
        self.ht[target].used += 1;
        Ok(())
    }

    /// Inserts or overwrites. Returns `true` when the key was newly added,
    /// `false` when an existing value was replaced.
    pub fn replace(&mut self, key: Bytes, val: V) -> bool {
        if self.is_rehashing() {
            self.rehash_step(1);
        }
        if let Some(slot) = self.find_mut_no_step(&key) {
            *slot = val;
            return false;
        }
        // Absent: route through add for the resize bookkeeping. The lookup
        // above just missed, so this cannot report a duplicate.
        self.add(key, val).is_ok()
    }

    /// Looks up a key, consulting both tables while a rehash is in progress.
    pub fn find(&self, key: &[u8]) -> Option<&V> {
        if self.len() == 0 {
            return None;
        }
        let hash = Self::hash_key(key) as usize;
        for t in 0..=1 {
            if self.ht[t].size() == 0 {
                break;
            }
            let idx = hash & self.ht[t].mask();
            let mut cur = &self.ht[t].buckets[idx];
            while let Some(entry) = cur.as_deref() {
                if entry.key.as_ref() == key {
                    return Some(&entry.val);
                }
                cur = &entry.next;
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Mutable lookup; advances the rehash like other mutating calls.
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        if self.is_rehashing() {
            self.rehash_step(1);
        }
        self.find_mut_no_step(key)
    }

    /// Removes a key. Returns whether an entry was removed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        if self.len() == 0 {
            return false;
        }
        if self.is_rehashing() {
            self.rehash_step(1);
        }

        let hash = Self::hash_key(key) as usize;
        for t in 0..=1 {
            if self.ht[t].size() == 0 {
                break;
            }
            let idx = hash & self.ht[t].mask();
            if remove_from_chain(&mut self.ht[t].buckets[idx], key).is_some() {
                self.ht[t].used -= 1;
                return true;
            }
            if !self.is_rehashing() {
                break;
            }
        }
        false
    }

    /// Migrates up to `n` non-empty buckets from the old table to the new
    /// one, visiting at most `10 * n` empty buckets along the way.
    ///
    /// Returns `true` while the rehash is still in progress afterwards.
    pub fn rehash_step(&mut self, n: usize) -> bool {
        let Some(mut cursor) = self.rehash_idx else {
            return false;
        };
        if n == 0 {
            return true;
        }

        let mut empty_visits = n * 10;
        let mut remaining = n;

        while remaining > 0 && self.ht[0].used > 0 {
            while cursor < self.ht[0].buckets.len() && self.ht[0].buckets[cursor].is_none() {
                cursor += 1;
                empty_visits -= 1;
                if empty_visits == 0 {
                    self.rehash_idx = Some(cursor);
                    return true;
                }
            }
            if cursor >= self.ht[0].buckets.len() {
                break;
            }

            let mut chain = self.ht[0].buckets[cursor].take();
            while let Some(mut entry) = chain {
                chain = entry.next.take();
                let idx = (Self::hash_key(&entry.key) as usize) & self.ht[1].mask();
                entry.next = self.ht[1].buckets[idx].take();
                self.ht[1].buckets[idx] = Some(entry);
                self.ht[0].used -= 1;
                self.ht[1].used += 1;
            }
            cursor += 1;
            remaining -= 1;
        }

        if self.ht[0].used == 0 {
            self.ht[0] = std::mem::replace(&mut self.ht[1], Table::empty());
            self.rehash_idx = None;
            return false;
        }

        self.rehash_idx = Some(cursor);
        true
    }

    fn find_mut_no_step(&mut self, key: &[u8]) -> Option<&mut V> {
        if self.len() == 0 {
            return None;
        }
        let hash = Self::hash_key(key) as usize;
        let rehashing = self.is_rehashing();
        if self.ht[0].size() != 0 {
            let idx = hash & self.ht[0].mask();
            if find_in_chain_mut(&mut self.ht[0].buckets[idx], key).is_some() {
                let idx = hash & self.ht[0].mask();
                return find_in_chain_mut(&mut self.ht[0].buckets[idx], key);
            }
        }
        if rehashing && self.ht[1].size() != 0 {
            let idx = hash & self.ht[1].mask();
            if find_in_chain_mut(&mut self.ht[1].buckets[idx], key).is_some() {
                let idx = hash & self.ht[1].mask();
                return find_in_chain_mut(&mut self.ht[1].buckets[idx], key);
            }
        }
        None
    }

    /// Allocates the first table, or starts a rehash into a larger one when
    /// the load factor calls for it.
    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.ht[0].size() == 0 {
            self.ht[0] = Table::with_size(INITIAL_SIZE);
            return;
        }

        let used = self.ht[0].used;
        let size = self.ht[0].size();
        let should_expand = if self.can_resize {
            used >= size
        } else {
            used >= size * FORCED_RESIZE_RATIO
        };
        if should_expand {
            let new_size = next_power_of_two(used * 2);
            self.ht[1] = Table::with_size(new_size);
            self.rehash_idx = Some(0);
        }
    }

    fn hash_key(key: &[u8]) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

/// Unlinks the entry for `key` from a bucket chain and returns it.
fn remove_from_chain<V>(link: &mut Link<V>, key: &[u8]) -> Option<Box<ChainEntry<V>>> {
    let matches_head = match link {
        Some(entry) => entry.key.as_ref() == key,
        None => return None,
    };
    if matches_head {
        let mut removed = link.take()?;
        *link = removed.next.take();
        Some(removed)
    } else {
        match link {
            Some(entry) => remove_from_chain(&mut entry.next, key),
            None => None,
        }
    }
}

fn find_in_chain_mut<'a, V>(link: &'a mut Link<V>, key: &[u8]) -> Option<&'a mut V> {
    match link {
        None => None,
        Some(entry) => {
            if entry.key.as_ref() == key {
                Some(&mut entry.val)
            } else {
                find_in_chain_mut(&mut entry.next, key)
            }
        }
    }
}

fn next_power_of_two(target: usize) -> usize {
    let mut size = INITIAL_SIZE;
    while size < target {
        size *= 2;
    }
    size
}
