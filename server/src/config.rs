//! Runtime settings, filled from the command line by the `server` binary

use shared::{DEFAULT_PORT, VIEW_RADIUS};
use std::path::PathBuf;
use std::time::Duration;

/// Where a new session's entity appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPolicy {
    /// Always `(0, 0)`
    Origin,
    /// A random cell of `[0, width) x [0, height)`
    Random { width: u32, height: u32 },
}

/// What happens to a session's entity when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectPolicy {
    /// The entity leaves the world with its session
    Remove,
    /// The entity stays behind as a static occupant
    KeepStatic,
}

/// Backing store for persisted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Sled(PathBuf),
    InMemory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub view_radius: u32,
    pub max_sessions: usize,
    /// Bound of each session's outbound queue
    pub queue_depth: usize,
    pub spawn: SpawnPolicy,
    pub on_disconnect: DisconnectPolicy,
    pub store: StoreConfig,
    /// Entities generated when no snapshot exists
    pub seed_count: usize,
    pub seed_width: u32,
    pub seed_height: u32,
    /// `None` writes the snapshot only at shutdown
    pub snapshot_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            view_radius: VIEW_RADIUS,
            max_sessions: 64,
            queue_depth: 32,
            spawn: SpawnPolicy::Origin,
            on_disconnect: DisconnectPolicy::Remove,
            store: StoreConfig::Sled(PathBuf::from("proximity-db")),
            seed_count: 10,
            seed_width: 10,
            seed_height: 10,
            snapshot_interval: None,
        }
    }
}
