use log::{debug, info};
use shared::{Entity, EntityId, NeighborSnapshot, ServerMessage};

/// What changed after applying one server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    Assigned(EntityId),
    Neighborhood { visible: usize },
}

/// The client's picture of the world: its own id, its last known position and
/// the latest neighborhood the server sent.
#[derive(Debug, Clone, Default)]
pub struct ClientView {
    pub client_id: Option<EntityId>,
    pub position: (i64, i64),
    pub neighbors: NeighborSnapshot,
}

impl ClientView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: ServerMessage) -> ViewUpdate {
        match message {
            ServerMessage::Welcome(handshake) => {
                info!("Assigned client ID: {}", handshake.client_id);
                self.client_id = Some(handshake.client_id);
                ViewUpdate::Assigned(handshake.client_id)
            }
            ServerMessage::Neighbors(neighbors) => {
                // Keep the previous position if our own entity is missing
                if let Some(own) = self.client_id.and_then(|id| neighbors.get(&id)) {
                    self.position = own.cell();
                } else {
                    debug!("Snapshot without own entity, keeping {:?}", self.position);
                }
                self.neighbors = neighbors;
                ViewUpdate::Neighborhood {
                    visible: self.neighbors.len(),
                }
            }
        }
    }

    pub fn own_entity(&self) -> Option<&Entity> {
        self.client_id.and_then(|id| self.neighbors.get(&id))
    }

    pub fn is_connected(&self) -> bool {
        self.client_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Handshake;

    fn snapshot(entities: &[Entity]) -> ServerMessage {
        ServerMessage::Neighbors(entities.iter().map(|e| (e.id, e.clone())).collect())
    }

    #[test]
    fn test_welcome_sets_id() {
        let mut view = ClientView::new();
        assert!(!view.is_connected());

        let update = view.apply(ServerMessage::Welcome(Handshake { client_id: 4 }));

        assert_eq!(update, ViewUpdate::Assigned(4));
        assert_eq!(view.client_id, Some(4));
    }

    #[test]
    fn test_snapshot_tracks_own_position() {
        let mut view = ClientView::new();
        view.apply(ServerMessage::Welcome(Handshake { client_id: 2 }));

        let update = view.apply(snapshot(&[Entity::new(2, 5, -1), Entity::new(9, 6, 0)]));

        assert_eq!(update, ViewUpdate::Neighborhood { visible: 2 });
        assert_eq!(view.position, (5, -1));
        assert_eq!(view.own_entity(), Some(&Entity::new(2, 5, -1)));
    }

    #[test]
    fn test_snapshot_without_own_entity_keeps_position() {
        let mut view = ClientView::new();
        view.apply(ServerMessage::Welcome(Handshake { client_id: 2 }));
        view.apply(snapshot(&[Entity::new(2, 1, 1)]));

        view.apply(snapshot(&[Entity::new(3, 0, 0)]));

        assert_eq!(view.position, (1, 1));
        assert!(view.own_entity().is_none());
    }
}
