//! Error types shared by the server modules

use shared::EntityId;
use thiserror::Error;

/// Rejections from the spatial registry. Both are recoverable: the caller
/// observes "state unchanged".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cell ({x}, {y}) is occupied by entity {occupant}")]
    Occupied { x: i64, y: i64, occupant: EntityId },

    #[error("entity {0} is not registered")]
    NotFound(EntityId),

    #[error("entity {0} is already registered")]
    DuplicateId(EntityId),
}

/// Failures talking to the key-value store or decoding what it holds.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for PersistenceError {
    fn from(e: sled::Error) -> Self {
        PersistenceError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(e: bincode::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// Reasons a connection could not become a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("server full")]
    ServerFull,

    #[error("spawn rejected: {0}")]
    Spawn(#[from] RegistryError),
}

/// Failures on a session's channel. Isolated to that session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("outbound channel of session {0} is closed")]
    ChannelClosed(EntityId),

    #[error("outbound queue of session {0} is full")]
    QueueFull(EntityId),

    #[error("failed to encode payload: {0}")]
    Encode(String),
}
