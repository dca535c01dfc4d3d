//! Session bookkeeping for connected clients
//!
//! This module tracks who is connected and where their updates go:
//! - Session lifecycle metadata (id, peer address, connect time)
//! - The bounded outbound queue each session's writer task drains
//! - Capacity enforcement
//!
//! A session's id is also the id of the entity it controls. Creating and
//! destroying the entity is done by the world, which holds this table and the
//! spatial registry under one lock.

use log::info;
use shared::EntityId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// A live connection and the entity it steers.
#[derive(Debug)]
pub struct Session {
    /// Session id, equal to the controlled entity's id
    pub id: EntityId,
    /// Peer address, for logs
    pub addr: SocketAddr,
    /// When the session was registered
    pub connected_at: Instant,
    /// Outbound payloads, drained by the connection's writer task
    pub sender: mpsc::Sender<String>,
}

impl Session {
    pub fn new(id: EntityId, addr: SocketAddr, sender: mpsc::Sender<String>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// A closed channel means the writer task is gone.
    pub fn is_live(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// All registered sessions, indexed by id.
pub struct SessionTable {
    sessions: HashMap<EntityId, Session>,
    max_sessions: usize,
}

impl SessionTable {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    /// Registers a session. The caller has already placed its entity.
    pub fn insert(&mut self, session: Session) {
        info!("Session {} connected from {}", session.id, session.addr);
        self.sessions.insert(session.id, session);
    }

    /// Drops a session record. Returns `None` if it was already gone.
    pub fn remove(&mut self, id: EntityId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        info!(
            "Session {} disconnected after {:.1}s",
            id,
            session.connected_at.elapsed().as_secs_f32()
        );
        Some(session)
    }

    pub fn get(&self, id: EntityId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_session(id: EntityId) -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (Session::new(id, test_addr(), tx), rx)
    }

    #[test]
    fn test_session_creation() {
        let (session, _rx) = test_session(3);

        assert_eq!(session.id, 3);
        assert_eq!(session.addr, test_addr());
        assert!(session.is_live());
    }

    #[test]
    fn test_session_liveness_follows_receiver() {
        let (session, rx) = test_session(1);
        drop(rx);
        assert!(!session.is_live());
    }

    #[test]
    fn test_table_creation() {
        let table = SessionTable::new(5);
        assert_eq!(table.max_sessions(), 5);
        assert!(table.is_empty());
        assert!(!table.is_full());
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = SessionTable::new(2);
        let (session, _rx) = test_session(1);

        table.insert(session);
        assert_eq!(table.len(), 1);
        assert!(table.contains(1));
        assert_eq!(table.get(1).map(|s| s.id), Some(1));

        assert!(table.remove(1).is_some());
        assert!(table.remove(1).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_unknown() {
        let mut table = SessionTable::new(2);
        let (session, _rx) = test_session(1);
        table.insert(session);

        assert!(table.remove(999).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let mut table = SessionTable::new(2);
        let (a, _rx_a) = test_session(1);
        let (b, _rx_b) = test_session(2);

        table.insert(a);
        assert!(!table.is_full());
        table.insert(b);
        assert!(table.is_full());

        let mut ids = table.ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
