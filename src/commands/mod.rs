//! Command Processing
//!
//! The layer between the wire and the cache: parsed RESP frames come in,
//! replies come out.
//!
//! ```text
//! Client request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │  validate shape │
//! │  dispatch       │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    LruCache     │  (cache module, overflows into persist)
//! └─────────────────┘
//! ```

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
