//! EmberKV Router
//!
//! Entry point for the consistent-hashing router: it terminates client
//! connections and relays each command to the shard owning its key.

use emberkv::connection::ConnectionStats;
use emberkv::router::{handle_client, HashRing, ShardAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Router configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Backend shard addresses
    shards: Vec<ShardAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_ROUTER_PORT,
            shards: Vec::new(),
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
                "--shard" | "-s" => {
                    let addr = take_value(&args, &mut i, "--shard");
                    match addr.parse::<ShardAddr>() {
                        Ok(shard) => config.shards.push(shard),
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV router version {}", emberkv::VERSION);
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

        if config.shards.is_empty() {
            eprintln!("Error: at least one --shard ip:port is required");
            std::process::exit(1);
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
EmberKV Router - Consistent-Hashing Front Door for a Shard Fleet

USAGE:
    emberkv-router --shard <IP:PORT> [--shard <IP:PORT> ...] [OPTIONS]

OPTIONS:
    -h, --host <HOST>       Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>       Port to listen on (default: 7000)
    -s, --shard <IP:PORT>   Backend shard address (repeatable, required)
    -v, --version           Print version information
        --help              Print this help message

EXAMPLES:
    emberkv-router -s 127.0.0.1:6379
    emberkv-router -p 7001 -s 10.0.0.1:6379 -s 10.0.0.2:6379
"#
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let ring = Arc::new(HashRing::from_shards(config.shards.iter().cloned()));
    for shard in &config.shards {
        info!(shard = %shard, position = shard.ring_position(), "Shard on ring");
    }

    let stats = Arc::new(ConnectionStats::new());

    // A bind failure is fatal and surfaces as a non-zero exit code.
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        shards = config.shards.len(),
        "Router listening on {}",
        config.bind_address()
    );

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping router...");
    };

    tokio::select! {
        _ = accept_loop(listener, ring, stats) => {}
        _ = shutdown => {}
    }

    info!("Router shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming client connections
async fn accept_loop(listener: TcpListener, ring: Arc<HashRing>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let ring = Arc::clone(&ring);
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_client(stream, addr, ring, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
