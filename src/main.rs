//! EmberKV Shard Server
//!
//! Entry point for one shard: it owns the cache, the persistent store, and
//! the TCP listener, and serves the RESP command set until interrupted.

use emberkv::cache::LruCache;
use emberkv::commands::CommandHandler;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::persist::{Compactor, CompactorConfig, PersistentStore};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Cache memory budget in bytes
    max_bytes: usize,
    /// Base path of the persistent store files
    data: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
            max_bytes: emberkv::DEFAULT_MAX_BYTES,
            data: "emberkv".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = take_value(&args, &mut i, "--host");
                }
                "--port" | "-p" => {
                    config.port = take_value(&args, &mut i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                }
                "--maxmemory" | "-m" => {
                    config.max_bytes =
                        take_value(&args, &mut i, "--maxmemory").parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid memory size");
                            std::process::exit(1);
                        });
                }
                "--data" | "-d" => {
                    config.data = take_value(&args, &mut i, "--data");
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {}", other);
                    print_help();
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Fetches the value following a flag, exiting with a message if absent.
fn take_value(args: &[String], i: &mut usize, flag: &str) -> String {
    *i += 1;
    match args.get(*i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - A Memory-Bounded Key-Value Store with Persistent Overflow

USAGE:
    emberkv-server [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>        Port to listen on (default: 6379)
    -m, --maxmemory <BYTES>  Cache memory budget (default: 1073741824)
    -d, --data <PATH>        Base path for the data files (default: emberkv)
    -v, --version            Print version information
        --help               Print this help message

EXAMPLES:
    emberkv-server                           # Start on 127.0.0.1:6379
    emberkv-server --port 6380               # Start on port 6380
    emberkv-server -m 10485760 -d /var/kv    # 10 MB budget, files under /var

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name ember
    OK
    127.0.0.1:6379> GET name
    "ember"
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
EmberKV v{} - Memory-Bounded Key-Value Store
─────────────────────────────────────────────
Listening on {}
Memory limit {} bytes, allkeys-lru eviction
Persistent store at {}.txt

Use Ctrl+C to shutdown gracefully.
"#,
        emberkv::VERSION,
        config.bind_address(),
        config.max_bytes,
        config.data,
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    print_banner(&config);

    // The persistent store recovers its index from disk before serving.
    let store = Arc::new(PersistentStore::open(&config.data)?);
    let _compactor = Compactor::start(Arc::clone(&store), CompactorConfig::default());

    let cache = Arc::new(Mutex::new(LruCache::new(config.max_bytes, store)));
    info!(
        max_bytes = config.max_bytes,
        "Cache initialized with allkeys-lru eviction"
    );

    let stats = Arc::new(ConnectionStats::new());

    // A bind failure is fatal and surfaces as a non-zero exit code.
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, cache, stats) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    cache: Arc<Mutex<LruCache>>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&cache));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
