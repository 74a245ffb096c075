//! Persistent Overflow Store
//!
//! Keys evicted from the in-memory cache land here and survive restarts.
//! The store is an append-only data file fronted by two in-memory
//! structures rebuilt on startup:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PersistentStore                          │
//! │                                                             │
//! │   get(k) ──> CountingFilter ──> OffsetTrie ──> data file    │
//! │              (skip misses)      (key→offset)   (seek+read)  │
//! │                                                             │
//! │   insert(k,v) ──> append record, update trie + filter       │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ one shared mutex
//!               ┌──────────────┴──────────────┐
//!               │          Compactor          │
//!               │   (background std thread)   │
//!               └─────────────────────────────┘
//! ```
//!
//! The compactor periodically rewrites the file with only the live records
//! and swaps it in with an atomic rename, so a crash at any point leaves
//! either the old or the new file intact.

pub mod filter;
pub mod store;
pub mod trie;

// Re-export commonly used types
pub use filter::{CountingFilter, DEFAULT_FILTER_SIZE};
pub use store::{Compactor, CompactorConfig, PersistentStore, StoreError};
pub use trie::OffsetTrie;
