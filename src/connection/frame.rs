//! Framed RESP Connections
//!
//! A [`Connection`] owns one socket and the buffering that turns its byte
//! stream back into frames. The same type carries both halves of the
//! system: a shard reads commands and writes replies, the router reads
//! client frames and replays raw reply bytes.
//!
//! Reading is demand-driven: [`Connection::read_frame`] first tries to cut
//! a frame out of what is already buffered and only then touches the
//! socket, so a pipelined burst is drained without extra reads and a frame
//! split across segments is reassembled transparently. A clean close
//! between frames is a normal end of stream (`Ok(None)`); a close in the
//! middle of one is an error, as is any byte sequence that is not RESP.

use crate::protocol::{ParseError, RespParser, RespValue, MAX_BULK_SIZE};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Largest frame worth buffering: the maximum legal bulk string plus slack
/// for its framing.
pub const MAX_FRAME_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_INPUT_CAPACITY: usize = 4096;

/// Errors that end a framed connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O failure on the socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that are not valid RESP
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The peer closed with a partial frame still buffered
    #[error("peer closed mid-frame")]
    UnexpectedEof,

    /// More bytes buffered than any legal frame can span
    #[error("frame exceeds the {MAX_FRAME_SIZE} byte bound")]
    FrameTooLarge,
}

/// One socket plus the input accumulator and parser that frame it.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    input: BytesMut,
    parser: RespParser,
}

impl Connection {
    /// Wraps an established socket.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            input: BytesMut::with_capacity(INITIAL_INPUT_CAPACITY),
            parser: RespParser::new(),
        }
    }

    /// Returns the next frame together with its exact wire bytes, or
    /// `None` when the peer closes cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<(RespValue, Bytes)>, ConnectionError> {
        loop {
            if let Some((frame, consumed)) = self.parser.parse(&self.input)? {
                let raw = self.input.split_to(consumed).freeze();
                return Ok(Some((frame, raw)));
            }

            if self.input.len() >= MAX_FRAME_SIZE {
                return Err(ConnectionError::FrameTooLarge);
            }
            if self.input.capacity() - self.input.len() < 1024 {
                self.input.reserve(4096);
            }

            let n = self.stream.get_mut().read_buf(&mut self.input).await?;
            if n == 0 {
                return if self.input.is_empty() {
                    Ok(None)
                } else {
                    Err(ConnectionError::UnexpectedEof)
                };
            }
        }
    }

    /// Encodes a frame and writes it out completely.
    pub async fn write_frame(&mut self, frame: &RespValue) -> Result<(), ConnectionError> {
        let bytes = frame.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Writes pre-encoded frame bytes out completely. The relay path uses
    /// this to pass frames along without re-encoding them.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
