//! # Proximity Server Library
//!
//! This library provides the authoritative server for a shared two-dimensional
//! grid. Clients each steer one entity around the grid; after every accepted
//! change the server tells each client about the entities within a fixed view
//! radius of its own entity.
//!
//! ## Core Responsibilities
//!
//! ### Spatial Authority
//! The server owns the only copy of the grid. Each cell holds at most one
//! entity, and every move is checked against that rule before it is applied.
//! A move into an occupied cell is rejected and nothing changes.
//!
//! ### Session Management
//! Handles the lifecycle of client connections:
//! - WebSocket upgrade on the `/ws` endpoint
//! - Entity creation at the spawn cell and the `{"client_id": N}` handshake
//! - Decoding of the four text intents
//! - Disconnection and cleanup of the session's entity
//!
//! ### Proximity Broadcasting
//! After every connect, accepted move, and disconnect, each live session is
//! sent the full set of entities within its view radius (Chebyshev distance).
//!
//! ### Persistence
//! The whole map is stored as one snapshot and restored at startup. Each entity
//! is additionally written through as its own record so the store can be
//! inspected while the server runs. Record writes go through one ordered
//! queue, so the last write for an entity is the one that sticks.
//!
//! ## Module Organization
//!
//! ### Registry Module (`registry`)
//! The sparse grid: entity by id and id by cell, kept as a bijection.
//!
//! ### Session Module (`session`)
//! Connection metadata and each session's bounded outbound queue.
//!
//! ### World Module (`world`)
//! Registry and session table behind one lock, with the operations that must
//! keep both in step.
//!
//! ### Broadcast Module (`broadcast`)
//! Per-session neighborhood fan-out.
//!
//! ### Persistence Module (`persistence`)
//! Key-value store abstraction, snapshot codec, the record writer and startup
//! bootstrap.
//!
//! ### Network Module (`network`)
//! TCP listener, WebSocket upgrade and the per-connection tasks.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{ServerConfig, StoreConfig};
//! use server::network::Server;
//! use server::persistence::{bootstrap_world, PersistenceGateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         store: StoreConfig::InMemory,
//!         ..ServerConfig::default()
//!     };
//!     let gateway = PersistenceGateway::open(&config.store)?;
//!     let world = bootstrap_world(&gateway, &config)?;
//!
//!     let server = Server::bind(&config, world, gateway).await?;
//!     server.run().await.map_err(|e| e as Box<dyn std::error::Error>)?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod network;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod world;

pub use config::{DisconnectPolicy, ServerConfig, SpawnPolicy, StoreConfig};
pub use error::{PersistenceError, RegistryError, SessionError, TransportError};
pub use network::Server;
pub use persistence::{bootstrap_world, PersistenceGateway};
pub use registry::SpatialRegistry;
pub use world::World;
