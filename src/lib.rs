//! # EmberKV - A Memory-Bounded Key-Value Store with Persistent Overflow
//!
//! EmberKV is a Redis-protocol key-value shard written in Rust. Hot keys
//! live in a bounded in-memory LRU cache; entries evicted under memory
//! pressure overflow into an append-only persistent store and flow back in
//! on demand. A separate router binary scales a fleet of shards out with
//! consistent hashing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             EmberKV shard                               │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (listener)  │    │  handler    │    │  handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │  ┌─────────────┐                              ▼                         │
//! │  │  RESP-2     │    ┌──────────────────────────────────────────────┐    │
//! │  │  codec      │    │                LruCache                      │    │
//! │  └─────────────┘    │   dict (incremental rehash) + recency list   │    │
//! │                     └──────────────────────┬───────────────────────┘    │
//! │                              evictions │   │ ▲ hydration                │
//! │                                        ▼   ▼ │                          │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │             PersistentStore                  │    │
//! │                     │   append-only file + offset trie + filter    │    │
//! │                     └──────────────────────▲───────────────────────┘    │
//! │                                            │                            │
//! │                     ┌──────────────────────┴───────────────────────┐    │
//! │                     │         Compactor (background thread)        │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//!        clients ──> emberkv-router ──(consistent hashing)──> shards
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value` - store a key
//! - `GET key` - fetch a key, falling back to the persistent store
//! - `DEL key [key ...]` - remove keys everywhere
//! - `INFO` - memory and keyspace statistics
//! - `CONFIG GET maxmemory|maxmemory-policy` - read configuration
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP-2 frame types and incremental parser
//! - [`cache`]: the hash dictionary and memory-bounded LRU cache
//! - [`persist`]: append-only store, offset trie, counting filter, compactor
//! - [`commands`]: command dispatch against the cache
//! - [`connection`]: framed connections and the per-client serve loop
//! - [`router`]: consistent hash ring and request relay
//!
//! ## Design Highlights
//!
//! ### Bounded memory
//!
//! The cache charges every entry `len(key) + len(value)` plus a fixed
//! overhead against its budget and never exceeds it: inserts evict from the
//! cold end of the recency list first, and an entry that cannot fit at all
//! is rejected.
//!
//! ### Best-effort durability
//!
//! Evicted entries are appended to the data file before leaving memory, so
//! a restart recovers everything that ever overflowed. The background
//! compactor rewrites the file with only the live records and swaps it in
//! with an atomic rename.
//!
//! ### Single-threaded reactors
//!
//! Both binaries run a current-thread Tokio runtime: one OS thread drives
//! the listener and every connection task. The only other thread in a
//! shard process is the compactor, synchronized with the foreground through
//! the store's single mutex.

pub mod cache;
pub mod commands;
pub mod connection;
pub mod persist;
pub mod protocol;
pub mod router;

// Re-export commonly used types for convenience
pub use cache::{CacheError, Dict, LruCache};
pub use commands::CommandHandler;
pub use connection::{handle_connection, ConnectionStats};
pub use persist::{Compactor, CompactorConfig, PersistentStore};
pub use protocol::{ParseError, RespParser, RespValue};
pub use router::{HashRing, ShardAddr};

/// The default port a shard listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default port the router listens on
pub const DEFAULT_ROUTER_PORT: u16 = 7000;

/// The default host both binaries bind to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default cache memory budget (1 GB)
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024 * 1024;

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
