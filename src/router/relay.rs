//! Request Relay
//!
//! The router's per-client loop. Client connections are long-lived and
//! framed with the same [`Connection`] type the shards use; each complete
//! frame is routed by its key and relayed over a one-shot upstream
//! connection:
//!
//! ```text
//! client frame ──> read_frame ──> key ──> ring successor ──┐
//!                                                          │ connect
//!                                                          ▼
//!                                                   shard (one-shot)
//!                                                          │ reply
//! client <──── relay complete RESP reply <─────────────────┘
//! ```
//!
//! The original frame bytes are forwarded untouched, so the shard sees
//! exactly what the client sent, and the reply is framed by the codec on
//! the way back rather than trusted to arrive in a single read. Any
//! failure on the upstream leg drops the client connection; there is no
//! fallback shard.

use crate::connection::{Connection, ConnectionError, ConnectionStats};
use crate::protocol::RespValue;
use crate::router::ring::HashRing;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Errors that end a relayed client connection.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Framing or I/O failure on the client or upstream leg
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The frame carried no routable element
    #[error("Frame is not a routable command")]
    NotACommand,

    /// No shards are registered on the ring
    #[error("Hash ring is empty")]
    EmptyRing,

    /// Could not connect to the responsible shard
    #[error("Upstream shard {addr} unreachable")]
    UpstreamConnectFailed { addr: String },

    /// The shard closed before sending a complete reply
    #[error("Upstream closed before a complete reply")]
    UpstreamEof,
}

/// Serves one client connection, relaying every frame to its shard.
pub async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    ring: Arc<HashRing>,
    stats: Arc<ConnectionStats>,
) {
    stats.connection_opened();
    info!(client = %addr, "Client connected");

    match relay_loop(stream, &ring).await {
        Ok(()) => info!(client = %addr, "Client disconnected"),
        Err(RelayError::Connection(ConnectionError::Io(ref e)))
            if e.kind() == std::io::ErrorKind::ConnectionReset =>
        {
            debug!(client = %addr, "Connection reset by client")
        }
        Err(e) => warn!(client = %addr, error = %e, "Dropping client connection"),
    }

    stats.connection_closed();
}

async fn relay_loop(stream: TcpStream, ring: &HashRing) -> Result<(), RelayError> {
    let mut conn = Connection::new(stream);
    while let Some((frame, raw)) = conn.read_frame().await? {
        let reply = route_and_forward(&frame, &raw, ring).await?;
        conn.write_raw(&reply).await?;
    }
    Ok(())
}

/// Picks the shard for a frame and performs the one-shot exchange.
async fn route_and_forward(
    frame: &RespValue,
    raw: &Bytes,
    ring: &HashRing,
) -> Result<Bytes, RelayError> {
    let key = routing_key(frame).ok_or(RelayError::NotACommand)?;
    let shard = ring.shard_for_key(key).ok_or(RelayError::EmptyRing)?;
    trace!(shard = %shard, "Routing frame");

    let stream = TcpStream::connect((shard.ip.as_str(), shard.port))
        .await
        .map_err(|e| {
            warn!(shard = %shard, error = %e, "Upstream connect failed");
            RelayError::UpstreamConnectFailed {
                addr: shard.to_string(),
            }
        })?;

    // One-shot exchange: send the untouched frame, frame exactly one reply,
    // and let the dropped connection close the upstream socket.
    let mut upstream = Connection::new(stream);
    upstream.write_raw(raw).await?;
    match upstream.read_frame().await? {
        Some((_, reply)) => Ok(reply),
        None => Err(RelayError::UpstreamEof),
    }
}

/// Extracts the element a frame is routed by: the key in second position
/// for `SET`/`GET`/`DEL`, falling back to the command name for keyless
/// frames so that routing stays total.
fn routing_key(frame: &RespValue) -> Option<&[u8]> {
    let elements = frame.as_array()?;
    let element = elements.get(1).or_else(|| elements.first())?;
    element
        .as_bytes()
        .or_else(|| element.as_str().map(str::as_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use crate::commands::CommandHandler;
    use crate::connection::handle_connection;
    use crate::persist::PersistentStore;
    use crate::router::ring::ShardAddr;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type SharedCache = Arc<Mutex<LruCache>>;

    async fn spawn_shard(dir: &TempDir, name: &str) -> (ShardAddr, SharedCache) {
        let store = Arc::new(
            PersistentStore::open_with_filter_size(dir.path().join(name), 256).unwrap(),
        );
        let cache = Arc::new(Mutex::new(LruCache::new(1024 * 1024, store)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let cache_clone = Arc::clone(&cache);
        tokio::spawn(async move {
            let stats = Arc::new(ConnectionStats::new());
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&cache_clone));
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (ShardAddr::new("127.0.0.1", addr.port()), cache)
    }

    async fn spawn_router(shards: Vec<ShardAddr>) -> SocketAddr {
        let ring = Arc::new(HashRing::from_shards(shards));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let stats = Arc::new(ConnectionStats::new());
            while let Ok((stream, client_addr)) = listener.accept().await {
                let ring = Arc::clone(&ring);
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_client(stream, client_addr, ring, stats));
            }
        });

        addr
    }

    async fn exchange(client: &mut TcpStream, request: &[u8], expected: &[u8]) {
        client.write_all(request).await.unwrap();
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..], expected);
    }

    #[tokio::test]
    async fn set_and_get_through_router() {
        let dir = TempDir::new().unwrap();
        let (shard_a, _) = spawn_shard(&dir, "a").await;
        let (shard_b, _) = spawn_shard(&dir, "b").await;
        let router = spawn_router(vec![shard_a, shard_b]).await;

        let mut client = TcpStream::connect(router).await.unwrap();
        exchange(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
            b"+OK\r\n",
        )
        .await;
        exchange(
            &mut client,
            b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
            b"$3\r\nbar\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn identical_keys_land_on_one_shard() {
        let dir = TempDir::new().unwrap();
        let (shard_a, cache_a) = spawn_shard(&dir, "a").await;
        let (shard_b, cache_b) = spawn_shard(&dir, "b").await;
        let (shard_c, cache_c) = spawn_shard(&dir, "c").await;
        let router = spawn_router(vec![shard_a, shard_b, shard_c]).await;

        let mut client = TcpStream::connect(router).await.unwrap();
        exchange(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$6\r\npinned\r\n$2\r\nv1\r\n",
            b"+OK\r\n",
        )
        .await;
        exchange(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$6\r\npinned\r\n$2\r\nv2\r\n",
            b"+OK\r\n",
        )
        .await;

        // Both writes must have hit the same shard: exactly one cache saw
        // the key, and it holds the second value.
        let holders: Vec<bool> = [&cache_a, &cache_b, &cache_c]
            .iter()
            .map(|c| c.lock().unwrap().contains(b"pinned"))
            .collect();
        assert_eq!(holders.iter().filter(|&&h| h).count(), 1);

        exchange(
            &mut client,
            b"*2\r\n$3\r\nGET\r\n$6\r\npinned\r\n",
            b"$2\r\nv2\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn keys_spread_and_stay_readable() {
        let dir = TempDir::new().unwrap();
        let (shard_a, _) = spawn_shard(&dir, "a").await;
        let (shard_b, _) = spawn_shard(&dir, "b").await;
        let router = spawn_router(vec![shard_a, shard_b]).await;

        let mut client = TcpStream::connect(router).await.unwrap();
        for i in 0..20 {
            let key = format!("key:{}", i);
            let set = format!(
                "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n$2\r\nvv\r\n",
                key.len(),
                key
            );
            exchange(&mut client, set.as_bytes(), b"+OK\r\n").await;
        }
        for i in 0..20 {
            let key = format!("key:{}", i);
            let get = format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), key);
            exchange(&mut client, get.as_bytes(), b"$2\r\nvv\r\n").await;
        }
    }

    #[tokio::test]
    async fn dead_upstream_drops_client_connection() {
        // Reserve a port and close it again so nothing is listening.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let router = spawn_router(vec![ShardAddr::new("127.0.0.1", dead_addr.port())]).await;

        let mut client = TcpStream::connect(router).await.unwrap();
        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "expected the router to drop the connection");
    }

    #[test]
    fn routing_key_prefers_second_element() {
        let frame = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from("GET")),
            RespValue::bulk_string(Bytes::from("the-key")),
        ]);
        assert_eq!(routing_key(&frame), Some(&b"the-key"[..]));

        let keyless = RespValue::array(vec![RespValue::bulk_string(Bytes::from("INFO"))]);
        assert_eq!(routing_key(&keyless), Some(&b"INFO"[..]));

        assert_eq!(routing_key(&RespValue::integer(3)), None);
        assert_eq!(routing_key(&RespValue::array(vec![])), None);
    }
}
