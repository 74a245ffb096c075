//! RESP-2 Data Types
//!
//! This module defines the frame types exchanged with clients. EmberKV speaks
//! the RESP-2 subset that covers its command set:
//!
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String (with `$-1\r\n` signalling absence)
//! - `*` Array
//!
//! Every frame is terminated with CRLF (`\r\n`). Requests arrive as Arrays of
//! Bulk Strings; responses use whichever kind the command calls for.

use bytes::Bytes;

/// The CRLF terminator used by the wire protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single RESP-2 frame, used for both parsed requests and encoded replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe text without CRLF. Format: `+<text>\r\n`
    SimpleString(String),

    /// An error condition. Format: `-<message>\r\n`
    Error(String),

    /// 64-bit signed integer. Format: `:<n>\r\n`
    Integer(i64),

    /// Binary-safe payload up to 512 MB. Format: `$<len>\r\n<bytes>\r\n`
    BulkString(Bytes),

    /// The null bulk string, `$-1\r\n`, signalling an absent value.
    Null,

    /// A sequence of frames. Format: `*<count>\r\n<frames...>`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a simple string reply.
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates an integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string reply.
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates the null bulk string.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array reply.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// The canonical `+OK\r\n` reply.
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Serializes the frame to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the frame into an existing buffer.
    ///
    /// Integer and length fields are plain decimal, so zero encodes as `0`
    /// with no padding.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    /// Returns true if this frame is the null bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this frame is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Extracts the payload of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Extracts text from a simple string or UTF-8 bulk string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Extracts the elements of an array frame.
    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Consumes self and returns the array elements, if this is an array.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}
