//! ShardCache Daemon - Redis-compatible RESP front end for shardcache

mod handler;
mod resp;
mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shardcache::{CacheConfig, ShardedCache, DEFAULT_SHARD_BITS};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    bind: String,

    /// Cache capacity in bytes of key + value
    #[arg(short, long, default_value_t = 64 * 1024 * 1024)]
    capacity: usize,

    /// log2 of the number of cache shards
    #[arg(long, default_value_t = DEFAULT_SHARD_BITS)]
    shard_bits: u8,

    /// Seed for key hashing
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

impl Args {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.capacity)
            .with_shard_bits(self.shard_bits)
            .with_hash_seed(self.seed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    info!("Starting ShardCache Daemon v{}", env!("CARGO_PKG_VERSION"));

    let config = args.cache_config();
    let cache = Arc::new(ShardedCache::new(config)?);
    info!(
        "Cache capacity: {} bytes across {} shards",
        cache.config().capacity,
        cache.shard_count()
    );

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Server listening on {} (redis://{})", args.bind, args.bind);

    tokio::select! {
        _ = server::serve(listener, Arc::clone(&cache)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutting down, {} keys cached", cache.len());
        }
    }

    Ok(())
}
