//! Counting Existence Filter
//!
//! A fixed-size array of counters consulted before the trie on reads: a zero
//! bucket proves a key was never written (no false negatives for live keys),
//! while a positive bucket only suggests presence. Removal decrements, which
//! keeps the filter approximately in sync without the bit-clearing hazard of
//! a plain Bloom filter. The trie stays authoritative; this is a hint to
//! skip the index walk and the disk seek.

use std::hash::{DefaultHasher, Hash, Hasher};

/// Default bucket count, sized for the expected key cardinality of one shard.
pub const DEFAULT_FILTER_SIZE: usize = 10_000;

/// A counting filter with a single hash position per key.
#[derive(Debug)]
pub struct CountingFilter {
    buckets: Vec<u32>,
}

impl CountingFilter {
    /// Creates a filter with `size` buckets.
    pub fn new(size: usize) -> Self {
        Self {
            buckets: vec![0; size.max(1)],
        }
    }

    /// Records a key. Counters saturate rather than wrap.
    pub fn insert(&mut self, key: &[u8]) {
        let idx = self.position(key);
        self.buckets[idx] = self.buckets[idx].saturating_add(1);
    }

    /// Forgets one occurrence of a key. A saturated or colliding bucket may
    /// under-decrement; that only widens the false-positive set.
    pub fn remove(&mut self, key: &[u8]) {
        let idx = self.position(key);
        if self.buckets[idx] > 0 {
            self.buckets[idx] -= 1;
        }
    }

    /// Returns false only when the key cannot be present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.buckets[self.position(key)] > 0
    }

    fn position(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.buckets.len()
    }
}

impl Default for CountingFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_SIZE)
    }
}
