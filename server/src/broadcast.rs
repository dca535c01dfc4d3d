//! Proximity fan-out to every live session
//!
//! Each tick resends, to every session, the full set of entities within the
//! view radius of its own entity. There is no delta protocol.
//!
//! Payloads are pushed with `try_send` into each session's bounded queue while
//! the caller still holds the world guard. The send never waits, so a stalled
//! session cannot hold up the rest of the tick, and snapshots enter every
//! queue in the order the world changed. A full queue drops that one frame;
//! the next tick carries the complete state again.

use crate::error::TransportError;
use crate::world::World;
use log::{debug, warn};
use shared::NeighborSnapshot;
use tokio::sync::mpsc::error::TrySendError;

/// Per-tick delivery counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    /// Queue full, frame dropped
    pub dropped: usize,
    /// Writer task gone
    pub closed: usize,
    pub failed: usize,
}

impl BroadcastStats {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed + self.failed
    }
}

pub fn encode_neighbors(neighbors: &NeighborSnapshot) -> Result<String, TransportError> {
    serde_json::to_string(neighbors).map_err(|e| TransportError::Encode(e.to_string()))
}

pub struct BroadcastEngine {
    radius: u32,
}

impl BroadcastEngine {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    /// Sends every live session its current neighborhood. Read-only with
    /// respect to the world.
    pub fn tick(&self, world: &World) -> BroadcastStats {
        let mut stats = BroadcastStats::default();

        for session in world.sessions().iter() {
            if !session.is_live() {
                stats.closed += 1;
                continue;
            }

            let Some(neighbors) = world.neighbors_of(session.id, self.radius) else {
                warn!("Session {} has no entity to centre on", session.id);
                stats.failed += 1;
                continue;
            };

            let payload = match encode_neighbors(&neighbors) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Session {}: {}", session.id, e);
                    stats.failed += 1;
                    continue;
                }
            };

            match session.sender.try_send(payload) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("{}", TransportError::QueueFull(session.id));
                    stats.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{}", TransportError::ChannelClosed(session.id));
                    stats.closed += 1;
                }
            }
        }

        debug!(
            "Broadcast: {} delivered, {} dropped, {} closed, {} failed",
            stats.delivered, stats.dropped, stats.closed, stats.failed
        );
        stats
    }
}
