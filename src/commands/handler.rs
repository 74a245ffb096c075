//! Command Execution
//!
//! Receives parsed RESP frames, validates their shape, and executes them
//! against the shard's cache. Replies follow the Redis conventions for each
//! command:
//!
//! | Command           | Reply                                          |
//! |-------------------|------------------------------------------------|
//! | `SET key value`   | `+OK`, or an error when the entry cannot fit   |
//! | `GET key`         | Bulk String, or `$-1` on a miss                |
//! | `DEL key [key..]` | Integer count of keys removed                  |
//! | `INFO`            | Bulk String of memory and keyspace stats       |
//! | `CONFIG GET p`    | Two-element array `[p, value]`                 |
//!
//! Anything else answers `-ERR Unknown command` and leaves the connection
//! open.

use crate::cache::{CacheError, LruCache};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Executes commands against a shard's cache.
///
/// Cloning is cheap; every connection task holds its own handle onto the
/// shared cache.
#[derive(Clone)]
pub struct CommandHandler {
    cache: Arc<Mutex<LruCache>>,
}

impl CommandHandler {
    /// Creates a handler over the shared cache.
    pub fn new(cache: Arc<Mutex<LruCache>>) -> Self {
        Self { cache }
    }

    /// Executes one parsed frame and returns the reply to send.
    pub fn execute(&self, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => return RespValue::error("ERR invalid command format"),
        };

        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let name = match args[0].as_str() {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR invalid command name"),
        };

        self.dispatch(&name, &args[1..])
    }

    fn dispatch(&self, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "DEL" => self.cmd_del(args),
            "INFO" => self.cmd_info(args),
            "CONFIG" => self.cmd_config(args),
            _ => RespValue::error("ERR Unknown command"),
        }
    }

    /// Extracts the raw bytes of a key or value argument.
    fn get_bytes(&self, value: &RespValue) -> Option<Bytes> {
        match value {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone())),
            _ => None,
        }
    }

    /// SET key value
    fn cmd_set(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR SET command requires key and value");
        }
        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };
        let value = match self.get_bytes(&args[1]) {
            Some(v) => v,
            None => return RespValue::error("ERR invalid value"),
        };

        match self.cache.lock().unwrap().set(key, value) {
            Ok(()) => RespValue::ok(),
            Err(CacheError::EntryTooLarge { .. }) => {
                RespValue::error("ERR entry too large to cache")
            }
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return RespValue::error("ERR GET command requires key");
        }
        let key = match self.get_bytes(&args[0]) {
            Some(k) => k,
            None => return RespValue::error("ERR invalid key"),
        };

        match self.cache.lock().unwrap().get(&key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return RespValue::error("ERR DEL command requires at least one key");
        }

        let mut cache = self.cache.lock().unwrap();
        let mut removed = 0i64;
        for arg in args {
            let key = match self.get_bytes(arg) {
                Some(k) => k,
                None => return RespValue::error("ERR invalid key"),
            };
            if cache.del(&key) {
                removed += 1;
            }
        }
        RespValue::integer(removed)
    }

    /// INFO
    fn cmd_info(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return RespValue::error("ERR INFO command takes no arguments");
        }

        let cache = self.cache.lock().unwrap();
        let mut info = String::from("# Memory\r\n");
        info.push_str(&format!("used_memory:{}\r\n", cache.used_bytes()));
        info.push_str(&format!("maxmemory:{}\r\n", cache.max_bytes()));
        info.push_str("maxmemory_policy:allkeys-lru\r\n");
        info.push_str("# Stats\r\n");
        info.push_str(&format!("keyspace_hits:{}\r\n", cache.len()));

        RespValue::bulk_string(Bytes::from(info))
    }

    /// CONFIG GET parameter
    fn cmd_config(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ERR CONFIG command requires GET and a parameter");
        }
        let subcommand = match args[0].as_str() {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR invalid CONFIG subcommand"),
        };
        if subcommand != "GET" {
            return RespValue::error("ERR CONFIG command requires GET and a parameter");
        }
        let param = match args[1].as_str() {
            Some(p) => p.to_lowercase(),
            None => return RespValue::error("ERR invalid CONFIG parameter"),
        };

        match param.as_str() {
            "maxmemory" => {
                let max = self.cache.lock().unwrap().max_bytes();
                RespValue::array(vec![
                    RespValue::bulk_string(Bytes::from("maxmemory")),
                    RespValue::bulk_string(Bytes::from(max.to_string())),
                ])
            }
            "maxmemory-policy" => RespValue::array(vec![
                RespValue::bulk_string(Bytes::from("maxmemory-policy")),
                RespValue::bulk_string(Bytes::from("allkeys-lru")),
            ]),
            other => RespValue::error(format!("ERR unsupported CONFIG parameter '{}'", other)),
        }
    }
}
