//! Snapshot and per-entity persistence over an opaque key-value store
//!
//! Two kinds of records are kept:
//! - `map:state`: the whole registry, written at shutdown (and optionally on
//!   an interval) and read once at startup
//! - `entity:{id}`: one JSON record per live entity, written through on every
//!   accepted change so out-of-band tools can inspect the world
//!
//! Only a failure to read or decode the snapshot at startup is fatal. Every
//! other write is best-effort and is logged when it fails. Record writes from
//! running sessions go through [`RecordWriter`], one at a time and in order.

use crate::config::{ServerConfig, StoreConfig};
use crate::error::PersistenceError;
use crate::registry::SpatialRegistry;
use crate::world::World;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{Entity, EntityId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub const SNAPSHOT_KEY: &str = "map:state";
pub const ENTITY_KEY_PREFIX: &str = "entity:";

pub fn entity_key(id: EntityId) -> String {
    format!("{}{}", ENTITY_KEY_PREFIX, id)
}

/// The external store, reduced to what the server needs from it.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError>;

    fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    /// Every `(key, value)` whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError>;

    fn flush(&self) -> Result<(), PersistenceError>;
}

/// Embedded on-disk store.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let db = sled::open(path)
            .map_err(|e| PersistenceError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    #[cfg(test)]
    pub fn open_temp() -> Result<Self, PersistenceError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl KeyValueStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.db.get(key.as_bytes())?.map(|value| value.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            entries.push((String::from_utf8_lossy(&key).into_owned(), value.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-process store, used by tests and `--in-memory` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, PersistenceError> {
        self.entries
            .lock()
            .map_err(|_| PersistenceError::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, PersistenceError> {
        Ok(self
            .entries()?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Stored form of the whole registry. Each entity carries its own cell, so
/// this is the full coordinate map.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    entities: Vec<Entity>,
}

/// First id that cannot collide with any of `entities`.
pub fn next_available_id<'a, I>(entities: I) -> EntityId
where
    I: IntoIterator<Item = &'a Entity>,
{
    entities
        .into_iter()
        .map(|entity| entity.id)
        .max()
        .map_or(1, |max| max + 1)
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn open(config: &StoreConfig) -> Result<Self, PersistenceError> {
        let store: Arc<dyn KeyValueStore> = match config {
            StoreConfig::Sled(path) => {
                info!("Opening store at {}", path.display());
                Arc::new(SledStore::open(path)?)
            }
            StoreConfig::InMemory => {
                warn!("Using in-memory store; state will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::new(store))
    }

    /// Writes the full registry under the snapshot key. Returns the number of
    /// entities written.
    pub fn save_snapshot(&self, registry: &SpatialRegistry) -> Result<usize, PersistenceError> {
        let mut entities: Vec<Entity> = registry.entities().cloned().collect();
        entities.sort_by_key(|entity| entity.id);

        let data = bincode::serialize(&Snapshot { entities })?;
        self.store.set(SNAPSHOT_KEY, &data)?;
        self.store.flush()?;
        Ok(registry.len())
    }

    /// Reads the snapshot. `Ok(None)` means there is no prior state.
    pub fn load_snapshot(&self) -> Result<Option<Vec<Entity>>, PersistenceError> {
        let Some(data) = self.store.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = bincode::deserialize(&data)?;
        Ok(Some(snapshot.entities))
    }

    /// Loads the snapshot into a registry. A snapshot that breaks the
    /// one-entity-per-cell rule is as unusable as an undecodable one.
    pub fn restore_registry(&self) -> Result<Option<SpatialRegistry>, PersistenceError> {
        let Some(entities) = self.load_snapshot()? else {
            return Ok(None);
        };
        SpatialRegistry::from_entities(entities)
            .map(Some)
            .map_err(|e| PersistenceError::Serialization(format!("inconsistent snapshot: {}", e)))
    }

    pub fn save_entity(&self, entity: &Entity) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec(entity)?;
        self.store.set(&entity_key(entity.id), &data)
    }

    pub fn remove_entity(&self, id: EntityId) -> Result<(), PersistenceError> {
        self.store.remove(&entity_key(id))
    }

    pub fn load_entity(&self, id: EntityId) -> Result<Option<Entity>, PersistenceError> {
        match self.store.get(&entity_key(id))? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Every readable per-entity record, sorted by id. Unreadable records are
    /// logged and skipped.
    pub fn load_entity_records(&self) -> Result<Vec<Entity>, PersistenceError> {
        let mut entities = Vec::new();
        for (key, value) in self.store.scan_prefix(ENTITY_KEY_PREFIX)? {
            match serde_json::from_slice::<Entity>(&value) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
            }
        }
        entities.sort_by_key(|entity| entity.id);
        Ok(entities)
    }

    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.store.flush()
    }
}

/// One pending change to a per-entity record.
#[derive(Debug)]
enum RecordWrite {
    Save(Entity),
    Remove(EntityId),
    /// Answered once every write queued before it has been applied
    Drained(oneshot::Sender<()>),
}

/// Write-behind queue for per-entity records.
///
/// Callers enqueue and return at once. A single task applies the writes in
/// the order they were queued, so the last write for an id is the one that
/// sticks. Failures are logged and the write is dropped.
#[derive(Clone)]
pub struct RecordWriter {
    queue: mpsc::UnboundedSender<RecordWrite>,
}

impl RecordWriter {
    /// Starts the writer task. It stops once every handle is dropped.
    pub fn spawn(gateway: PersistenceGateway) -> (Self, JoinHandle<()>) {
        let (queue, mut pending) = mpsc::unbounded_channel::<RecordWrite>();

        let task = tokio::spawn(async move {
            while let Some(write) = pending.recv().await {
                let gateway = gateway.clone();
                // one write in flight at a time keeps them ordered
                let applied = tokio::task::spawn_blocking(move || apply_write(&gateway, write)).await;
                if let Err(e) = applied {
                    error!("Record write task failed: {}", e);
                }
            }
            debug!("Record writer stopped");
        });

        (Self { queue }, task)
    }

    pub fn save(&self, entity: Entity) {
        self.enqueue(RecordWrite::Save(entity));
    }

    pub fn remove(&self, id: EntityId) {
        self.enqueue(RecordWrite::Remove(id));
    }

    /// Waits until every write queued so far has been applied.
    pub async fn drained(&self) {
        let (done, applied) = oneshot::channel();
        self.enqueue(RecordWrite::Drained(done));
        let _ = applied.await;
    }

    fn enqueue(&self, write: RecordWrite) {
        if let Err(e) = self.queue.send(write) {
            warn!("Record writer is gone, dropping {:?}", e.0);
        }
    }
}

fn apply_write(gateway: &PersistenceGateway, write: RecordWrite) {
    match write {
        RecordWrite::Save(entity) => {
            if let Err(e) = gateway.save_entity(&entity) {
                error!("Failed to persist entity {}: {}", entity.id, e);
            }
        }
        RecordWrite::Remove(id) => {
            if let Err(e) = gateway.remove_entity(id) {
                error!("Failed to delete record of entity {}: {}", id, e);
            }
        }
        RecordWrite::Drained(done) => {
            let _ = done.send(());
        }
    }
}

/// Builds the starting world: the stored snapshot if there is one, otherwise
/// a freshly seeded area.
pub fn bootstrap_world(
    gateway: &PersistenceGateway,
    config: &ServerConfig,
) -> Result<World, PersistenceError> {
    if let Some(registry) = gateway.restore_registry()? {
        let world = World::with_registry(registry, config);
        info!(
            "Restored {} entities, next id {}",
            world.registry().len(),
            world.next_id()
        );
        return Ok(world);
    }

    info!("No stored map state, seeding a new world");
    let mut world = World::new(config);
    let seeded = world.seed_random(
        config.seed_count,
        config.seed_width,
        config.seed_height,
        &mut rand::thread_rng(),
    );
    for entity in &seeded {
        if let Err(e) = gateway.save_entity(entity) {
            error!("Failed to persist seeded entity {}: {}", entity.id, e);
        }
    }
    Ok(world)
}
