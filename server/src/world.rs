//! The shared world: spatial registry and session table behind one lock
//!
//! Every live entity appears in exactly one cell, and every session's entity is
//! registered. Both facts span the registry and the session table, so the two
//! live in one struct that the server wraps in a single `RwLock`. Nothing here
//! is async; callers hold the guard only for the in-memory mutation.

use crate::config::{DisconnectPolicy, ServerConfig, SpawnPolicy};
use crate::error::{RegistryError, SessionError};
use crate::persistence::next_available_id;
use crate::registry::{Cell, SpatialRegistry};
use crate::session::{Session, SessionTable};
use log::{debug, info, warn};
use rand::Rng;
use shared::{Entity, EntityId, Intent, NeighborSnapshot};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Result of applying one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The entity now sits at its new cell
    Moved(Entity),
    /// The destination was occupied; nothing changed
    Blocked { occupant: EntityId },
    /// Unknown session, or a step past the edge of the grid
    Ignored,
}

/// What became of a session's entity when the session was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// No such session
    Unknown,
    Removed(Entity),
    /// The entity stays in the world as a static occupant
    LeftBehind(Entity),
}

pub struct World {
    registry: SpatialRegistry,
    sessions: SessionTable,
    next_id: EntityId,
    spawn: SpawnPolicy,
    on_disconnect: DisconnectPolicy,
}

impl World {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_registry(SpatialRegistry::new(), config)
    }

    /// Wraps a restored registry. The id counter resumes above every
    /// restored id.
    pub fn with_registry(registry: SpatialRegistry, config: &ServerConfig) -> Self {
        let next_id = next_available_id(registry.entities());
        Self {
            registry,
            sessions: SessionTable::new(config.max_sessions),
            next_id,
            spawn: config.spawn,
            on_disconnect: config.on_disconnect,
        }
    }

    pub fn registry(&self) -> &SpatialRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// The id the next created entity will get.
    pub fn next_id(&self) -> EntityId {
        self.next_id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Picks the spawn cell for a new session according to the spawn policy.
    pub fn spawn_cell<R: Rng>(&self, rng: &mut R) -> Cell {
        match self.spawn {
            SpawnPolicy::Origin => (0, 0),
            SpawnPolicy::Random { width, height } => (
                rng.gen_range(0..i64::from(width.max(1))),
                rng.gen_range(0..i64::from(height.max(1))),
            ),
        }
    }

    /// Registers a new session with an entity at the policy's spawn cell.
    pub fn add_session(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<String>,
    ) -> Result<Entity, SessionError> {
        let cell = self.spawn_cell(&mut rand::thread_rng());
        self.add_session_at(cell, addr, sender)
    }

    /// Registers a new session whose entity appears at `cell`.
    ///
    /// An occupied spawn cell fails the whole call: no entity, no session, and
    /// no id is consumed. There is no retry at another cell.
    pub fn add_session_at(
        &mut self,
        cell: Cell,
        addr: SocketAddr,
        sender: mpsc::Sender<String>,
    ) -> Result<Entity, SessionError> {
        if self.sessions.is_full() {
            return Err(SessionError::ServerFull);
        }

        let id = self.next_id;
        let entity = Entity::controlled(id, cell.0, cell.1, id);
        self.registry.insert(entity.clone())?;
        self.allocate_id();
        self.sessions.insert(Session::new(id, addr, sender));

        info!("Spawned entity {} at ({}, {})", id, cell.0, cell.1);
        Ok(entity)
    }

    /// Drops a session and, depending on the disconnect policy, its entity.
    /// Removing an unknown session is a no-op.
    pub fn remove_session(&mut self, id: EntityId) -> Departure {
        if self.sessions.remove(id).is_none() {
            return Departure::Unknown;
        }

        match self.on_disconnect {
            DisconnectPolicy::Remove => match self.registry.remove(id) {
                Some(entity) => Departure::Removed(entity),
                None => Departure::Unknown,
            },
            DisconnectPolicy::KeepStatic => {
                if self.registry.set_controller(id, None).is_err() {
                    return Departure::Unknown;
                }
                match self.registry.get(id) {
                    Some(entity) => {
                        debug!("Entity {} stays as a static occupant", id);
                        Departure::LeftBehind(entity.clone())
                    }
                    None => Departure::Unknown,
                }
            }
        }
    }

    /// Undoes `add_session` for a session that never got going. Its entity is
    /// removed whatever the disconnect policy says.
    pub fn discard_session(&mut self, id: EntityId) -> Option<Entity> {
        self.sessions.remove(id)?;
        self.registry.remove(id)
    }

    /// Moves a session's entity one cell in the intent's direction.
    pub fn apply_intent(&mut self, session_id: EntityId, intent: Intent) -> MoveOutcome {
        if !self.sessions.contains(session_id) {
            warn!("Intent {} from unknown session {}", intent, session_id);
            return MoveOutcome::Ignored;
        }
        let Some(from) = self.registry.get(session_id).map(Entity::cell) else {
            warn!("Session {} has no registered entity", session_id);
            return MoveOutcome::Ignored;
        };
        let Some((x, y)) = intent.apply(from.0, from.1) else {
            debug!("Entity {} is at the edge of the grid", session_id);
            return MoveOutcome::Ignored;
        };

        match self.registry.move_to(session_id, x, y) {
            Ok(entity) => MoveOutcome::Moved(entity.clone()),
            Err(RegistryError::Occupied { occupant, .. }) => {
                debug!(
                    "Entity {} blocked by {} at ({}, {})",
                    session_id, occupant, x, y
                );
                MoveOutcome::Blocked { occupant }
            }
            Err(e) => {
                warn!("Move of entity {} failed: {}", session_id, e);
                MoveOutcome::Ignored
            }
        }
    }

    /// The registry as it should be stored.
    ///
    /// Under `Remove`, a session's entity goes away with the session, so
    /// entities still steered by a session are left out. Under `KeepStatic`
    /// they are kept and come back as static occupants.
    pub fn persistent_registry(&self) -> SpatialRegistry {
        let mut registry = self.registry.clone();
        if self.on_disconnect == DisconnectPolicy::Remove {
            for id in self.sessions.ids() {
                registry.remove(id);
            }
        }
        registry
    }

    /// Places up to `count` static entities on free cells of
    /// `[0, width) x [0, height)`. Occupied picks are skipped, and the number
    /// of attempts is bounded, so a crowded area yields fewer entities.
    /// Under `SpawnPolicy::Origin` the origin is never seeded, since every
    /// session spawns there.
    pub fn seed_random<R: Rng>(
        &mut self,
        count: usize,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Vec<Entity> {
        let (width, height) = (i64::from(width.max(1)), i64::from(height.max(1)));
        let reserved = self.reserved_spawn_cell();
        let area = usize::try_from(width * height).unwrap_or(usize::MAX);
        let free = area - usize::from(reserved.is_some());
        let target = count.min(free);
        let max_attempts = target.saturating_mul(16);

        let mut placed = Vec::with_capacity(target);
        let mut attempts = 0;
        while placed.len() < target && attempts < max_attempts {
            attempts += 1;
            let (x, y) = (rng.gen_range(0..width), rng.gen_range(0..height));
            if reserved == Some((x, y)) || self.registry.is_occupied(x, y) {
                continue;
            }
            let entity = Entity::new(self.next_id, x, y);
            if self.registry.insert(entity.clone()).is_ok() {
                self.allocate_id();
                placed.push(entity);
            }
        }

        if placed.len() < count {
            warn!(
                "Seeded {} of {} requested entities in a {}x{} area",
                placed.len(),
                count,
                width,
                height
            );
        } else {
            info!("Seeded {} entities in a {}x{} area", placed.len(), width, height);
        }
        placed
    }

    fn reserved_spawn_cell(&self) -> Option<Cell> {
        match self.spawn {
            SpawnPolicy::Origin => Some((0, 0)),
            SpawnPolicy::Random { .. } => None,
        }
    }

    /// The neighborhood a session currently sees, centred on its own entity.
    pub fn neighbors_of(&self, session_id: EntityId, radius: u32) -> Option<NeighborSnapshot> {
        let entity = self.registry.get(session_id)?;
        Some(self.registry.range_query(entity.x, entity.y, radius))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(8)
    }

    fn config(on_disconnect: DisconnectPolicy) -> ServerConfig {
        ServerConfig {
            max_sessions: 4,
            on_disconnect,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_add_session_spawns_at_origin() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let (tx, _rx) = channel();

        let entity = world.add_session(test_addr(), tx).unwrap();

        assert_eq!(entity.id, 1);
        assert_eq!(entity.cell(), (0, 0));
        assert_eq!(entity.controller, Some(1));
        assert!(world.sessions().contains(1));
        assert_eq!(world.registry().get(1), Some(&entity));
        assert_eq!(world.next_id(), 2);
    }

    #[test]
    fn test_occupied_spawn_registers_nothing() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        world.add_session(test_addr(), tx1).unwrap();
        let result = world.add_session(test_addr(), tx2);

        assert!(matches!(
            result,
            Err(SessionError::Spawn(RegistryError::Occupied { occupant: 1, .. }))
        ));
        assert_eq!(world.sessions().len(), 1);
        assert_eq!(world.registry().len(), 1);
        assert_eq!(world.next_id(), 2);
        assert!(world.registry().is_consistent());
    }

    #[test]
    fn test_server_full() {
        let mut world = World::new(&ServerConfig {
            max_sessions: 1,
            ..ServerConfig::default()
        });
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        world.add_session_at((0, 0), test_addr(), tx1).unwrap();
        assert_eq!(
            world.add_session_at((5, 5), test_addr(), tx2),
            Err(SessionError::ServerFull)
        );
        assert!(!world.registry().is_occupied(5, 5));
    }

    #[test]
    fn test_random_spawn_stays_in_area() {
        let world = World::new(&ServerConfig {
            spawn: SpawnPolicy::Random {
                width: 3,
                height: 2,
            },
            ..ServerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let (x, y) = world.spawn_cell(&mut rng);
            assert!((0..3).contains(&x));
            assert!((0..2).contains(&y));
        }
    }

    #[test]
    fn test_remove_session_removes_entity() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let (tx, _rx) = channel();
        world.add_session(test_addr(), tx).unwrap();

        assert_eq!(
            world.remove_session(1),
            Departure::Removed(Entity::controlled(1, 0, 0, 1))
        );
        assert_eq!(world.remove_session(1), Departure::Unknown);
        assert!(world.registry().is_empty());
        assert!(world.sessions().is_empty());
    }

    #[test]
    fn test_remove_session_keeps_static_entity() {
        let mut world = World::new(&config(DisconnectPolicy::KeepStatic));
        let (tx, _rx) = channel();
        world.add_session(test_addr(), tx).unwrap();

        assert_eq!(world.remove_session(1), Departure::LeftBehind(Entity::new(1, 0, 0)));
        assert!(world.sessions().is_empty());
        assert!(world.registry().get(1).unwrap().is_static());

        // the left-behind entity now blocks the origin for the next session
        let (tx, _rx) = channel();
        assert!(world.add_session(test_addr(), tx).is_err());
    }

    #[test]
    fn test_discard_session_ignores_keep_policy() {
        let mut world = World::new(&config(DisconnectPolicy::KeepStatic));
        let (tx, _rx) = channel();
        world.add_session(test_addr(), tx).unwrap();

        assert_eq!(world.discard_session(1), Some(Entity::controlled(1, 0, 0, 1)));
        assert_eq!(world.discard_session(1), None);
        assert!(world.registry().is_empty());
        assert!(world.sessions().is_empty());
    }

    #[test]
    fn test_apply_intent_moves_and_blocks() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        world.add_session_at((0, 0), test_addr(), tx1).unwrap();
        world.add_session_at((2, 0), test_addr(), tx2).unwrap();

        assert_eq!(
            world.apply_intent(1, Intent::XPlus),
            MoveOutcome::Moved(Entity::controlled(1, 1, 0, 1))
        );
        assert_eq!(
            world.apply_intent(1, Intent::XPlus),
            MoveOutcome::Blocked { occupant: 2 }
        );
        assert_eq!(world.registry().get(1).unwrap().cell(), (1, 0));
        assert_eq!(world.registry().get(2).unwrap().cell(), (2, 0));

        assert_eq!(
            world.apply_intent(1, Intent::YMinus),
            MoveOutcome::Moved(Entity::controlled(1, 1, -1, 1))
        );
        assert!(world.registry().is_consistent());
    }

    #[test]
    fn test_apply_intent_unknown_session() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        assert_eq!(world.apply_intent(7, Intent::YPlus), MoveOutcome::Ignored);
    }

    #[test]
    fn test_apply_intent_at_grid_edge() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let (tx, _rx) = channel();
        world
            .add_session_at((i64::MAX, 0), test_addr(), tx)
            .unwrap();

        assert_eq!(world.apply_intent(1, Intent::XPlus), MoveOutcome::Ignored);
        assert_eq!(world.registry().get(1).unwrap().cell(), (i64::MAX, 0));
    }

    #[test]
    fn test_seed_random_fills_free_cells() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let mut rng = StdRng::seed_from_u64(42);

        let seeded = world.seed_random(10, 10, 10, &mut rng);

        assert_eq!(seeded.len(), 10);
        assert_eq!(world.registry().len(), 10);
        assert!(seeded.iter().all(Entity::is_static));
        assert!(seeded
            .iter()
            .all(|e| (0..10).contains(&e.x) && (0..10).contains(&e.y)));
        assert_eq!(world.next_id(), 11);
        assert!(world.registry().is_consistent());
    }

    #[test]
    fn test_seed_random_caps_at_area() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let mut rng = StdRng::seed_from_u64(3);

        let seeded = world.seed_random(50, 2, 2, &mut rng);

        assert!(seeded.len() <= 4);
        assert_eq!(world.registry().len(), seeded.len());
        assert!(world.registry().is_consistent());
    }

    #[test]
    fn test_seed_random_leaves_origin_free() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let mut rng = StdRng::seed_from_u64(7);

        // more than the area holds, so every other cell gets filled
        let seeded = world.seed_random(10, 2, 2, &mut rng);

        assert!(seeded.len() <= 3);
        assert!(!world.registry().is_occupied(0, 0));
        let (tx, _rx) = channel();
        assert!(world.add_session(test_addr(), tx).is_ok());
    }

    #[test]
    fn test_seed_random_may_use_origin_with_random_spawn() {
        let mut world = World::new(&ServerConfig {
            spawn: SpawnPolicy::Random {
                width: 2,
                height: 2,
            },
            ..ServerConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(7);

        let seeded = world.seed_random(1, 1, 1, &mut rng);

        assert_eq!(seeded, vec![Entity::new(1, 0, 0)]);
    }

    #[test]
    fn test_persistent_registry_drops_session_entities() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        world.seed_random(1, 1, 2, &mut StdRng::seed_from_u64(1));
        let (tx, _rx) = channel();
        let me = world.add_session(test_addr(), tx).unwrap();

        let stored = world.persistent_registry();

        assert_eq!(stored.len(), 1);
        assert!(!stored.contains(me.id));
        assert!(!stored.is_occupied(0, 0));
        assert!(stored.is_consistent());
        // the live registry is untouched
        assert!(world.registry().contains(me.id));
    }

    #[test]
    fn test_persistent_registry_keeps_entities_left_behind() {
        let mut world = World::new(&config(DisconnectPolicy::KeepStatic));
        let (tx, _rx) = channel();
        let me = world.add_session(test_addr(), tx).unwrap();

        let stored = world.persistent_registry();

        assert_eq!(stored.get(me.id).map(Entity::cell), Some((0, 0)));
    }

    #[test]
    fn test_with_registry_resumes_ids() {
        let registry = SpatialRegistry::from_entities(vec![
            Entity::new(3, 0, 0),
            Entity::new(17, 1, 1),
        ])
        .unwrap();
        let mut world = World::with_registry(registry, &config(DisconnectPolicy::Remove));
        assert_eq!(world.next_id(), 18);

        let (tx, _rx) = channel();
        let entity = world.add_session_at((4, 4), test_addr(), tx).unwrap();
        assert_eq!(entity.id, 18);
    }

    #[test]
    fn test_neighbors_of() {
        let mut world = World::new(&config(DisconnectPolicy::Remove));
        let mut rng = StdRng::seed_from_u64(9);
        world.seed_random(5, 3, 3, &mut rng);
        let (tx, _rx) = channel();
        let me = world.add_session_at((20, 20), test_addr(), tx).unwrap();

        let neighbors = world.neighbors_of(me.id, 3).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert!(neighbors.contains_key(&me.id));

        assert!(world.neighbors_of(999, 3).is_none());
    }
}
