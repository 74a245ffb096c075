//! In-Memory Cache
//!
//! The hot-path store of a shard: a memory-bounded LRU cache indexed by a
//! chained hash dictionary with incremental rehash.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LruCache                             │
//! │                                                             │
//! │   Dict (key → handle)          recency list (handles)       │
//! │  ┌──────────────────┐     head ──> [k3] ──> [k1] ──> tail   │
//! │  │ ht[0] │ ht[1]    │                                 │     │
//! │  │  incremental     │                                 ▼     │
//! │  │  rehash          │                      evict into the   │
//! │  └──────────────────┘                      persistent store │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Evicted entries overflow into [`crate::persist::PersistentStore`];
//! misses hydrate them back in.

pub mod dict;
pub mod lru;

// Re-export commonly used types
pub use dict::{Dict, DictError};
pub use lru::{entry_size, CacheError, LruCache, ENTRY_OVERHEAD};
