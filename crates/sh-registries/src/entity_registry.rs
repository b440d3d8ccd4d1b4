//! In-memory Entity Registry
//!
//! Holds entity definitions in insertion order and notifies subscribers of
//! every change.

use std::path::Path;
use std::sync::RwLock;

use indexmap::IndexMap;
use sh_core::{Entity, EntityId, Notifier};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{EntityRegistry, RegistryError, RegistryEvent, RegistryResult};

/// Entity registry backed by an ordered map
pub struct ManagedEntityRegistry {
    /// Uses IndexMap + RwLock to preserve insertion order
    entities: RwLock<IndexMap<EntityId, Entity>>,
    notifier: Notifier<RegistryEvent>,
}

impl ManagedEntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(IndexMap::new()),
            notifier: Notifier::new(),
        }
    }

    /// Load entity definitions from a YAML list
    pub async fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let registry = Self::from_yaml_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            count = registry.len(),
            "Loaded entity definitions"
        );
        Ok(registry)
    }

    pub fn from_yaml_str(yaml: &str) -> RegistryResult<Self> {
        let entities: Vec<Entity> = serde_yaml::from_str(yaml)?;
        let registry = Self::new();
        for entity in entities {
            registry.add(entity)?;
        }
        Ok(registry)
    }

    /// Register a new entity
    pub fn add(&self, entity: Entity) -> RegistryResult<()> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        if entities.contains_key(entity.id()) {
            return Err(RegistryError::AlreadyExists(entity.id().clone()));
        }
        debug!(entity_id = %entity.id(), "Adding entity");
        entities.insert(entity.id().clone(), entity.clone());
        // Notify under the lock so subscribers see changes in mutation order
        self.notifier.notify(RegistryEvent::Added(entity));
        Ok(())
    }

    /// Remove an entity
    pub fn remove(&self, id: &EntityId) -> Option<Entity> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        let removed = entities.shift_remove(id)?;
        debug!(entity_id = %id, "Removing entity");
        self.notifier.notify(RegistryEvent::Removed(removed.clone()));
        Some(removed)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities
            .read()
            .map(|idx| idx.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entities.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entities
            .read()
            .map(|idx| idx.is_empty())
            .unwrap_or(true)
    }
}

impl Default for ManagedEntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry for ManagedEntityRegistry {
    fn get(&self, id: &EntityId) -> Option<Entity> {
        self.entities
            .read()
            .ok()
            .and_then(|idx| idx.get(id).cloned())
    }

    fn all(&self) -> Vec<Entity> {
        self.entities
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    fn children_of(&self, parent: &EntityId) -> Vec<Entity> {
        self.entities
            .read()
            .map(|idx| {
                idx.values()
                    .filter(|entity| entity.parent() == Some(parent))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn update(&self, entity: Entity) -> RegistryResult<Entity> {
        let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
        let slot = entities
            .get_mut(entity.id())
            .ok_or_else(|| RegistryError::NotFound(entity.id().clone()))?;
        let old = std::mem::replace(slot, entity.clone());
        debug!(entity_id = %entity.id(), "Updating entity");
        self.notifier.notify(RegistryEvent::Updated {
            old: old.clone(),
            new: entity,
        });
        Ok(old)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        self.notifier.subscribe()
    }
}
