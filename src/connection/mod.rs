//! Client Connection Management
//!
//! Two layers: [`frame`] turns a socket into a stream of RESP frames, and
//! [`handler`] runs the shard's serve loop over it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP listener (main.rs)                  │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  handle_connection                                          │
//! │                                                             │
//! │   ┌───────────────────────┐        ┌─────────────────┐      │
//! │   │      Connection       │ frame  │ CommandHandler  │      │
//! │   │  socket + accumulator │───────>│    execute      │      │
//! │   │  read_frame           │        └────────┬────────┘      │
//! │   │  write_frame          │<────────────────┘               │
//! │   └───────────────────────┘  reply                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The router reuses [`Connection`] for both its client and shard legs, so
//! frame reassembly and reply framing live in exactly one place.

pub mod frame;
pub mod handler;

// Re-export commonly used types
pub use frame::{Connection, ConnectionError, MAX_FRAME_SIZE};
pub use handler::{handle_connection, ConnectionStats};
