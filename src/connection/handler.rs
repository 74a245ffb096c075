//! Shard Connection Serving
//!
//! Each accepted client socket gets one task running [`handle_connection`]:
//! pull a frame off the connection, execute it against the cache, write the
//! reply, repeat. Replies leave in arrival order because the loop never
//! reads ahead of the command it is answering.
//!
//! A client that closes between frames ends the task quietly. A client
//! that breaks the protocol, closes mid-frame, or hits an I/O error is
//! dropped; the listener and every other connection keep running.

use crate::commands::CommandHandler;
use crate::connection::frame::{Connection, ConnectionError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Connection lifecycle counters shared across a listener's tasks.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serves one client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    stats.connection_opened();
    info!(client = %addr, "Client connected");

    let mut conn = Connection::new(stream);
    match serve(&mut conn, &command_handler).await {
        Ok(()) => info!(client = %addr, "Client disconnected"),
        Err(ConnectionError::Io(ref e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
            debug!(client = %addr, "Connection reset by client")
        }
        Err(e) => warn!(client = %addr, error = %e, "Dropping client connection"),
    }

    stats.connection_closed();
}

/// The read-execute-respond loop.
async fn serve(conn: &mut Connection, handler: &CommandHandler) -> Result<(), ConnectionError> {
    while let Some((frame, _)) = conn.read_frame().await? {
        let reply = handler.execute(frame);
        conn.write_frame(&reply).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::persist::PersistentStore;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn create_test_server(max_bytes: usize) -> (SocketAddr, Arc<ConnectionStats>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store =
            Arc::new(PersistentStore::open_with_filter_size(dir.path().join("db"), 256).unwrap());
        let cache = Arc::new(Mutex::new(LruCache::new(max_bytes, store)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&cache));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, stats, dir)
    }

    async fn read_exactly(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], expected);
    }

    #[tokio::test]
    async fn set_get_roundtrip_over_socket() {
        let (addr, _, _dir) = create_test_server(1024).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"$3\r\nbar\r\n").await;
    }

    #[tokio::test]
    async fn unknown_command_keeps_connection_open() {
        let (addr, _, _dir) = create_test_server(1024).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exactly(&mut client, b"-ERR Unknown command\r\n").await;

        // The same connection still serves commands.
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn pipelined_commands_answer_in_order() {
        let (addr, _, _dir) = create_test_server(1024).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(
                b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n\
                  *3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk1\r\n\
                  *2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            )
            .await
            .unwrap();

        read_exactly(&mut client, b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n").await;
    }

    #[tokio::test]
    async fn malformed_frame_closes_connection() {
        let (addr, _, _dir) = create_test_server(1024).await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"@not resp\r\n").await.unwrap();

        // The server drops the connection rather than answering.
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn stats_track_connection_lifecycle() {
        let (addr, stats, _dir) = create_test_server(1024).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        read_exactly(&mut client, b"$-1\r\n").await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        drop(client);
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
    }
}
