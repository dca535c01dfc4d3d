//! # Proximity Console Client
//!
//! A terminal client for the proximity server. It connects over WebSocket,
//! prints the id the server assigns, and redraws the neighborhood around its
//! own entity every time the server sends one.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The client's view of the world:
//! - Assigned id from the handshake
//! - Last known own position
//! - Latest neighborhood snapshot
//!
//! ### Input Module (`input`)
//! Maps typed keys to commands (`w/a/s/d` to move, `0` or `q` to quit).
//!
//! ### Network Module (`network`)
//! Owns the WebSocket connection and multiplexes server payloads with
//! console input.
//!
//! ### Rendering Module (`rendering`)
//! Draws the neighborhood as a character matrix centred on the client's own
//! entity: `@` for itself, `#` for any other entity.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("ws://127.0.0.1:8080/ws").await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server is authoritative. The client never moves its own entity
//! locally; the position shown is always the last one the server reported.

pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
