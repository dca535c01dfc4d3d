//! Sparse spatial index over the unbounded integer grid
//!
//! The registry owns every live entity and keeps two views of them:
//! - `by_id`: identity to entity, the owning map
//! - `by_cell`: coordinate to occupant id, at most one occupant per cell
//!
//! The two maps form a bijection over live entities, and every mutation below
//! is a single transition that preserves it. Callers serialize access through
//! the world lock, so there is no interior locking here.

use crate::error::RegistryError;
use shared::{Entity, EntityId};
use std::collections::HashMap;

/// A grid coordinate `(x, y)`.
pub type Cell = (i64, i64);

#[derive(Debug, Default, Clone)]
pub struct SpatialRegistry {
    by_id: HashMap<EntityId, Entity>,
    by_cell: HashMap<Cell, EntityId>,
}

impl SpatialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a list of entities, failing on the first
    /// duplicate id or doubly occupied cell.
    pub fn from_entities<I>(entities: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut registry = Self::new();
        for entity in entities {
            registry.insert(entity)?;
        }
        Ok(registry)
    }

    /// Adds an entity at its own coordinates. Occupied cells are never
    /// overwritten.
    pub fn insert(&mut self, entity: Entity) -> Result<(), RegistryError> {
        if self.by_id.contains_key(&entity.id) {
            return Err(RegistryError::DuplicateId(entity.id));
        }
        let cell = entity.cell();
        if let Some(&occupant) = self.by_cell.get(&cell) {
            return Err(RegistryError::Occupied {
                x: cell.0,
                y: cell.1,
                occupant,
            });
        }

        self.by_cell.insert(cell, entity.id);
        self.by_id.insert(entity.id, entity);
        Ok(())
    }

    /// Deletes an entity from both maps. Unknown ids are a no-op.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.by_id.remove(&id)?;
        self.by_cell.remove(&entity.cell());
        Some(entity)
    }

    /// Relocates an entity to `(x, y)`.
    ///
    /// A move onto an occupied cell is rejected and leaves both entities where
    /// they were. Moving onto the cell an entity already holds succeeds.
    pub fn move_to(&mut self, id: EntityId, x: i64, y: i64) -> Result<&Entity, RegistryError> {
        let from = self
            .by_id
            .get(&id)
            .map(Entity::cell)
            .ok_or(RegistryError::NotFound(id))?;

        if from != (x, y) {
            if let Some(&occupant) = self.by_cell.get(&(x, y)) {
                return Err(RegistryError::Occupied { x, y, occupant });
            }
            self.by_cell.remove(&from);
            self.by_cell.insert((x, y), id);
        }

        let entity = self.by_id.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        entity.x = x;
        entity.y = y;
        Ok(entity)
    }

    /// Every entity within Chebyshev distance `radius` of `(cx, cy)`.
    ///
    /// Probes each of the `(2r+1)^2` cells of the square against the sparse
    /// cell map, so the cost depends on the radius and not on how many
    /// entities the world holds. Cells that would lie beyond the `i64` range
    /// do not exist and are skipped.
    pub fn range_query(&self, cx: i64, cy: i64, radius: u32) -> HashMap<EntityId, Entity> {
        let r = i64::from(radius);
        let mut found = HashMap::new();

        if self.by_cell.is_empty() {
            return found;
        }

        for dy in -r..=r {
            let Some(y) = cy.checked_add(dy) else {
                continue;
            };
            for dx in -r..=r {
                let Some(x) = cx.checked_add(dx) else {
                    continue;
                };
                if let Some(entity) = self.occupant(x, y) {
                    found.insert(entity.id, entity.clone());
                }
            }
        }

        found
    }

    /// Links or unlinks the session steering an entity.
    pub fn set_controller(
        &mut self,
        id: EntityId,
        controller: Option<EntityId>,
    ) -> Result<(), RegistryError> {
        let entity = self.by_id.get_mut(&id).ok_or(RegistryError::NotFound(id))?;
        entity.controller = controller;
        Ok(())
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.by_id.get(&id)
    }

    pub fn occupant(&self, x: i64, y: i64) -> Option<&Entity> {
        self.by_cell
            .get(&(x, y))
            .and_then(|id| self.by_id.get(id))
    }

    pub fn is_occupied(&self, x: i64, y: i64) -> bool {
        self.by_cell.contains_key(&(x, y))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.by_id.values()
    }

    /// Highest registered id, used to reseed the id counter after a restore.
    pub fn max_id(&self) -> Option<EntityId> {
        self.by_id.keys().copied().max()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Verifies the id/cell bijection.
    pub fn is_consistent(&self) -> bool {
        if self.by_id.len() != self.by_cell.len() {
            return false;
        }
        let ids_match = self
            .by_id
            .iter()
            .all(|(id, entity)| entity.id == *id && self.by_cell.get(&entity.cell()) == Some(id));
        let cells_match = self.by_cell.iter().all(|(cell, id)| {
            self.by_id
                .get(id)
                .is_some_and(|entity| entity.cell() == *cell)
        });
        ids_match && cells_match
    }
}
