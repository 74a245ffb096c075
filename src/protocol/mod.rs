//! RESP-2 Protocol Implementation
//!
//! The wire protocol between clients, the router, and the shards. Requests
//! are Arrays of Bulk Strings; replies use the five RESP-2 frame kinds the
//! server emits (Simple String, Error, Integer, Bulk String, Array).
//!
//! ## Modules
//!
//! - `types`: the `RespValue` frame enum and its serializer
//! - `parser`: incremental parser that distinguishes "incomplete" from
//!   "malformed" so connections can accumulate partial frames
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (frame, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(frame.as_array().map(|a| a.len()), Some(2));
//!
//! let reply = RespValue::bulk_string(Bytes::from("value"));
//! assert_eq!(reply.serialize(), b"$5\r\nvalue\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_message, ParseError, ParseResult, RespParser, MAX_BULK_SIZE};
pub use types::RespValue;
