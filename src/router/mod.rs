//! Consistent-Hash Router
//!
//! The stateless front door of a shard fleet. Clients connect to the router
//! as if it were a single server; every command is routed by its key to the
//! shard owning that slice of the hash ring and the reply relayed back.
//!
//! ```text
//!                         ┌──────────────┐
//!    client ────frame────>│    Router    │
//!                         │              │      ┌─────────┐
//!                         │  HashRing    │─────>│ shard A │
//!                         │  key → shard │      ├─────────┤
//!                         │              │─────>│ shard B │
//!    client <───reply─────│  relay       │      ├─────────┤
//!                         └──────────────┘─────>│ shard C │
//!                                               └─────────┘
//! ```
//!
//! Routing is deterministic for a stable ring, and adding or removing a
//! shard reassigns only the keys whose ring successor changed.

pub mod relay;
pub mod ring;

// Re-export commonly used types
pub use relay::{handle_client, RelayError};
pub use ring::{hash_position, HashRing, InvalidShardAddr, ShardAddr, RING_MASK};
