//! End-to-end tests for the RESP surface.
//!
//! Every test talks to a real listener over TCP with literal wire bytes, so
//! these cover the parser, dispatch, cache, persistence, and router as one
//! system.

use emberkv::cache::{entry_size, LruCache};
use emberkv::commands::CommandHandler;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::persist::PersistentStore;
use emberkv::router::{handle_client, HashRing, ShardAddr};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Starts a shard over the given data path and returns its address and the
/// accept-loop handle (aborting the handle stops the shard).
async fn start_shard(data: &Path, max_bytes: usize) -> (SocketAddr, JoinHandle<()>) {
    let store = Arc::new(PersistentStore::open_with_filter_size(data, 256).unwrap());
    let cache = Arc::new(Mutex::new(LruCache::new(max_bytes, store)));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let stats = Arc::new(ConnectionStats::new());
        while let Ok((stream, client_addr)) = listener.accept().await {
            let handler = CommandHandler::new(Arc::clone(&cache));
            let stats = Arc::clone(&stats);
            tokio::spawn(handle_connection(stream, client_addr, handler, stats));
        }
    });

    (addr, handle)
}

/// Starts a router fronting the given shards.
async fn start_router(shards: Vec<ShardAddr>) -> SocketAddr {
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

fn set_cmd(key: &str, value: &str) -> Vec<u8> {
    format!(
        "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        key.len(),
        key,
        value.len(),
        value
    )
    .into_bytes()
}

fn get_cmd(key: &str) -> Vec<u8> {
    format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), key).into_bytes()
}

fn bulk(value: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", value.len(), value).into_bytes()
}

/// Sends a command and reads exactly `expected.len()` reply bytes.
async fn exchange(stream: &mut TcpStream, cmd: &[u8], expected: &[u8]) {
    stream.write_all(cmd).await.unwrap();
    let mut buf = vec![0u8; expected.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(
        buf,
        expected,
        "reply mismatch: got {:?}",
        String::from_utf8_lossy(&buf)
    );
}

#[tokio::test]
async fn set_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 1024 * 1024).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
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
async fn missing_key() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 1024 * 1024).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(
        &mut client,
        b"*2\r\n$3\r\nGET\r\n$7\r\nabsent_\r\n",
        b"$-1\r\n",
    )
    .await;
}

#[tokio::test]
async fn multi_key_delete() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 1024 * 1024).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(&mut client, &set_cmd("a", "1"), b"+OK\r\n").await;
    exchange(&mut client, &set_cmd("c", "3"), b"+OK\r\n").await;
    exchange(
        &mut client,
        b"*4\r\n$3\r\nDEL\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        b":2\r\n",
    )
    .await;
}

#[tokio::test]
async fn lru_eviction_overflows_to_disk_and_rehydrates() {
    let dir = TempDir::new().unwrap();
    // Budget for exactly two entries with 2-byte keys and values.
    let budget = 2 * entry_size(b"k1", b"v1");
    let (addr, _shard) = start_shard(&dir.path().join("db"), budget).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(&mut client, &set_cmd("k1", "v1"), b"+OK\r\n").await;
    exchange(&mut client, &set_cmd("k2", "v2"), b"+OK\r\n").await;
    // Promote k1 so the next insert evicts k2 into the persistent store.
    exchange(&mut client, &get_cmd("k1"), &bulk("v1")).await;
    exchange(&mut client, &set_cmd("k3", "v3"), b"+OK\r\n").await;

    // The evicted record is on disk.
    let data = std::fs::read_to_string(dir.path().join("db.txt")).unwrap();
    assert!(data.contains("k2 v2"));

    // Reading k2 serves it from the persistent store and hydrates it back.
    exchange(&mut client, &get_cmd("k2"), &bulk("v2")).await;
}

#[tokio::test]
async fn unknown_command_leaves_connection_usable() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 1024 * 1024).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(
        &mut client,
        b"*1\r\n$4\r\nPING\r\n",
        b"-ERR Unknown command\r\n",
    )
    .await;
    exchange(&mut client, &set_cmd("k", "v"), b"+OK\r\n").await;
    exchange(&mut client, &get_cmd("k"), &bulk("v")).await;
}

#[tokio::test]
async fn info_and_config_expose_memory_policy() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 4096).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(&mut client, &set_cmd("k", "v"), b"+OK\r\n").await;

    client.write_all(b"*1\r\n$4\r\nINFO\r\n").await.unwrap();
    let mut buf = vec![0u8; 512];
    let n = client.read(&mut buf).await.unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]).to_string();
    assert!(reply.starts_with('$'));
    assert!(reply.contains("used_memory:"));
    assert!(reply.contains("maxmemory:4096"));
    assert!(reply.contains("maxmemory_policy:allkeys-lru"));
    assert!(reply.contains("keyspace_hits:1"));

    exchange(
        &mut client,
        b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$16\r\nmaxmemory-policy\r\n",
        b"*2\r\n$16\r\nmaxmemory-policy\r\n$11\r\nallkeys-lru\r\n",
    )
    .await;
}

#[tokio::test]
async fn evicted_keys_survive_restart() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("db");
    let budget = 2 * entry_size(b"k1", b"v1");

    let (addr, shard) = start_shard(&data, budget).await;
    {
        let mut client = TcpStream::connect(addr).await.unwrap();
        exchange(&mut client, &set_cmd("k1", "v1"), b"+OK\r\n").await;
        exchange(&mut client, &set_cmd("k2", "v2"), b"+OK\r\n").await;
        exchange(&mut client, &set_cmd("k3", "v3"), b"+OK\r\n").await; // evicts k1
    }
    shard.abort();

    // A fresh shard over the same files recovers the overflowed key.
    let (addr, _shard) = start_shard(&data, budget).await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    exchange(&mut client, &get_cmd("k1"), &bulk("v1")).await;
}

#[tokio::test]
async fn pipelined_burst_answers_in_order() {
    let dir = TempDir::new().unwrap();
    let (addr, _shard) = start_shard(&dir.path().join("db"), 1024 * 1024).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut burst = Vec::new();
    let mut expected = Vec::new();
    for i in 0..10 {
        burst.extend_from_slice(&set_cmd(&format!("key{}", i), &format!("val{}", i)));
        expected.extend_from_slice(b"+OK\r\n");
    }
    for i in 0..10 {
        burst.extend_from_slice(&get_cmd(&format!("key{}", i)));
        expected.extend_from_slice(&bulk(&format!("val{}", i)));
    }

    client.write_all(&burst).await.unwrap();
    let mut buf = vec![0u8; expected.len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, expected);
}

#[tokio::test]
async fn router_pins_a_key_to_one_shard() {
    let dir = TempDir::new().unwrap();
    let mut shards = Vec::new();
    for name in ["a", "b", "c"] {
        // Dropping the handle detaches the accept loop; the shard keeps
        // serving for the rest of the test.
        let (addr, _handle) = start_shard(&dir.path().join(name), 1024 * 1024).await;
        shards.push(ShardAddr::new("127.0.0.1", addr.port()));
    }
    let router = start_router(shards).await;

    // The same key routed twice lands on the same shard: the second SET
    // overwrites the first, so the read observes the newer value.
    let mut client = TcpStream::connect(router).await.unwrap();
    exchange(&mut client, &set_cmd("pinned", "one"), b"+OK\r\n").await;
    exchange(&mut client, &set_cmd("pinned", "two"), b"+OK\r\n").await;
    exchange(&mut client, &get_cmd("pinned"), &bulk("two")).await;

    // And reads through a second connection agree.
    let mut other = TcpStream::connect(router).await.unwrap();
    exchange(&mut other, &get_cmd("pinned"), &bulk("two")).await;
}

#[tokio::test]
async fn growing_the_ring_moves_keys_only_to_the_newcomer() {
    let shards: Vec<ShardAddr> = (0..3)
        .map(|i| ShardAddr::new("10.0.0.1", 6000 + i))
        .collect();
    let ring = HashRing::from_shards(shards.clone());

    let keys: Vec<String> = (0..60).map(|i| format!("key:{}", i)).collect();
    let before: Vec<ShardAddr> = keys
        .iter()
        .map(|k| ring.shard_for_key(k.as_bytes()).unwrap().clone())
        .collect();

    let mut grown = ring.clone();
    let newcomer = ShardAddr::new("10.0.0.1", 6003);
    grown.add_shard(newcomer.clone());

    for (key, old) in keys.iter().zip(&before) {
        let new = grown.shard_for_key(key.as_bytes()).unwrap();
        if new != old {
            assert_eq!(new, &newcomer, "key {} moved between old shards", key);
        }
    }
}
