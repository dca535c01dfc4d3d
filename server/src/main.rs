use clap::Parser;
use log::{error, info};
use server::config::{DisconnectPolicy, ServerConfig, SpawnPolicy, StoreConfig};
use server::network::Server;
use server::persistence::{bootstrap_world, PersistenceGateway};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// View radius in cells
    #[arg(short, long, default_value = "3")]
    radius: u32,

    /// Maximum number of concurrent sessions
    #[arg(short, long, default_value = "64")]
    max_sessions: usize,

    /// Outbound queue depth per session
    #[arg(long, default_value = "32")]
    queue_depth: usize,

    /// Path of the on-disk store
    #[arg(long, default_value = "proximity-db")]
    db: PathBuf,

    /// Keep state in memory only
    #[arg(long)]
    in_memory: bool,

    /// Entities to seed when no stored map exists
    #[arg(long, default_value = "10")]
    seed_count: usize,

    #[arg(long, default_value = "10")]
    seed_width: u32,

    #[arg(long, default_value = "10")]
    seed_height: u32,

    /// Spawn new sessions at a random cell of the seed area instead of (0, 0)
    #[arg(long)]
    spawn_random: bool,

    /// Leave a disconnected session's entity behind as a static occupant
    #[arg(long)]
    keep_entities: bool,

    /// Seconds between snapshots while running (0 = only at shutdown)
    #[arg(long, default_value = "0")]
    snapshot_interval: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            view_radius: self.radius,
            max_sessions: self.max_sessions,
            queue_depth: self.queue_depth,
            spawn: if self.spawn_random {
                SpawnPolicy::Random {
                    width: self.seed_width,
                    height: self.seed_height,
                }
            } else {
                SpawnPolicy::Origin
            },
            on_disconnect: if self.keep_entities {
                DisconnectPolicy::KeepStatic
            } else {
                DisconnectPolicy::Remove
            },
            store: if self.in_memory {
                StoreConfig::InMemory
            } else {
                StoreConfig::Sled(self.db)
            },
            seed_count: self.seed_count,
            seed_width: self.seed_width,
            seed_height: self.seed_height,
            snapshot_interval: (self.snapshot_interval > 0)
                .then(|| Duration::from_secs(self.snapshot_interval)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    info!("Starting server with {:?}", config);

    let gateway = PersistenceGateway::open(&config.store)?;
    let world = match bootstrap_world(&gateway, &config) {
        Ok(world) => world,
        Err(e) => {
            error!("Cannot load stored map state: {}", e);
            return Err(e.into());
        }
    };

    let server = Server::bind(&config, world, gateway.clone()).await?;
    let snapshot_timer = config
        .snapshot_interval
        .map(|every| server.spawn_snapshot_timer(every));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    if let Some(timer) = snapshot_timer {
        timer.abort();
    }

    match server.shutdown().await {
        Ok(count) => info!("Saved map state ({} entities)", count),
        Err(e) => error!("Failed to save map state: {}", e),
    }
    if let Err(e) = gateway.flush() {
        error!("Failed to flush store: {}", e);
    }

    Ok(())
}
