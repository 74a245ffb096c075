//! Consistent Hash Ring
//!
//! Maps keys to shards so that membership changes reassign only the keys
//! whose ring successor changed (about 1/N of them for N shards), instead of
//! reshuffling the whole keyspace the way modulo hashing would.
//!
//! Each shard occupies one position, `H(ip ‖ ":" ‖ port)` masked into the
//! non-negative 31-bit space. A key routes to the first shard at or after
//! its own hash position, wrapping around to the smallest position when it
//! hashes past the last shard.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Positions live in the non-negative 31-bit hash space.
pub const RING_MASK: u32 = 0x7FFF_FFFF;

/// Hashes arbitrary bytes onto the ring.
pub fn hash_position(bytes: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    (hasher.finish() as u32) & RING_MASK
}

/// The address of one backend shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAddr {
    pub ip: String,
    pub port: u16,
}

impl ShardAddr {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// The shard's position on the ring, derived from its address.
    pub fn ring_position(&self) -> u32 {
        hash_position(self.to_string().as_bytes())
    }
}

impl fmt::Display for ShardAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Error for malformed `ip:port` strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid shard address '{0}', expected ip:port")]
pub struct InvalidShardAddr(pub String);

impl FromStr for ShardAddr {
    type Err = InvalidShardAddr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidShardAddr(s.to_string()))?;
        if ip.is_empty() {
            return Err(InvalidShardAddr(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| InvalidShardAddr(s.to_string()))?;
        Ok(ShardAddr::new(ip, port))
    }
}

/// An ordered ring of shard positions.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    ring: BTreeMap<u32, ShardAddr>,
}

impl HashRing {
    /// Creates an empty ring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ring from a list of shard addresses.
    pub fn from_shards(shards: impl IntoIterator<Item = ShardAddr>) -> Self {
        let mut ring = Self::new();
        for shard in shards {
            ring.add_shard(shard);
        }
        ring
    }

    /// Places a shard on the ring.
    pub fn add_shard(&mut self, shard: ShardAddr) {
        self.ring.insert(shard.ring_position(), shard);
    }

    /// Removes a shard from the ring, if present.
    pub fn remove_shard(&mut self, shard: &ShardAddr) {
        let position = shard.ring_position();
        if self.ring.get(&position) == Some(shard) {
            self.ring.remove(&position);
        }
    }

    /// Number of shards on the ring.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true when no shards are registered.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Resolves the shard responsible for `key`: the successor of the key's
    /// hash position, wrapping to the first shard past the top of the ring.
    pub fn shard_for_key(&self, key: &[u8]) -> Option<&ShardAddr> {
        if self.ring.is_empty() {
            return None;
        }
        let position = hash_position(key);
        self.ring
            .range(position..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, shard)| shard)
    }
}
