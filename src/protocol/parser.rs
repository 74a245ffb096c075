//! Incremental RESP-2 Parser
//!
//! TCP is a byte stream, so a reader may hold half a frame, one frame, or a
//! dozen pipelined frames at any moment. The parser therefore reports three
//! outcomes:
//!
//! - `Ok(Some((frame, consumed)))` — a complete frame; `consumed` bytes of the
//!   input belong to it and should be advanced past
//! - `Ok(None)` — the input ends mid-frame; accumulate more bytes and retry
//! - `Err(ParseError)` — the input violates the protocol; the connection is
//!   beyond recovery and must be closed
//!
//! The caller owns the buffer: append incoming network data, call [`RespParser::parse`],
//! advance by `consumed` on success, and loop until the buffer runs dry.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that mark a connection's input as unrecoverable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The frame starts with a byte that is not a known type prefix
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A length or integer field is not valid decimal
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Simple string or error text is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (and not the -1 null marker)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (and not the -1 null marker)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Structural violation: missing CRLF, payload shorter than declared, etc.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A bulk string declares more bytes than the protocol permits
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size of a single bulk string (512 MB, matching Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// An incremental RESP-2 parser.
///
/// The parser is stateless between calls apart from the nesting-depth guard,
/// so one instance can be reused for the lifetime of a connection.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to parse one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        self.parse_value(buf)
    }

    fn parse_value(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => self.parse_line(buf, RespValue::SimpleString),
            prefix::ERROR => self.parse_line(buf, RespValue::Error),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK_STRING => self.parse_bulk_string(buf),
            prefix::ARRAY => self.parse_array(buf),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses a single-line frame (`+…\r\n` or `-…\r\n`).
    fn parse_line(
        &mut self,
        buf: &[u8],
        build: fn(String) -> RespValue,
    ) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let text = std::str::from_utf8(&buf[1..1 + pos])
                    .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
                // prefix + content + CRLF
                Ok(Some((build(text.to_string()), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// Parses an integer frame: `:<n>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let n = parse_decimal(&buf[1..1 + pos])?;
                Ok(Some((RespValue::Integer(n), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// Parses a bulk string: `$<len>\r\n<bytes>\r\n`
    fn parse_bulk_string(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let len_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let declared = parse_decimal(&buf[1..1 + len_end])?;

        if declared == -1 {
            return Ok(Some((RespValue::Null, 1 + len_end + 2)));
        }
        if declared < 0 {
            return Err(ParseError::InvalidBulkLength(declared));
        }

        let len = declared as usize;
        if len > MAX_BULK_SIZE {
            return Err(ParseError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + len_end + 2;
        let total = data_start + len + 2;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[data_start + len..total] != CRLF {
            return Err(ParseError::ProtocolError(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + len]);
        Ok(Some((RespValue::BulkString(data), total)))
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let declared = parse_decimal(&buf[1..1 + count_end])?;

        if declared == -1 {
            return Ok(Some((RespValue::Null, 1 + count_end + 2)));
        }
        if declared < 0 {
            return Err(ParseError::InvalidArrayLength(declared));
        }

        let count = declared as usize;
        let mut elements = Vec::with_capacity(count.min(64));
        let mut consumed = 1 + count_end + 2;

        self.depth += 1;

        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }

            match self.parse_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        self.depth -= 1;

        Ok(Some((RespValue::Array(elements), consumed)))
    }
}

/// Parses a decimal integer field, rejecting non-digit noise.
fn parse_decimal(content: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(content).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))
}

/// Finds the position of `\r` in the first CRLF pair, if one is present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single frame from a byte slice with a fresh parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}
