//! Registries consumed by the entity manager
//!
//! This crate defines the collaborator traits the manager depends on:
//! - Entity definitions (EntityRegistry)
//! - Channel links (LinkRegistry)
//! - Type catalogs (EntityTypeProvider, ChannelTypeProvider)
//! - Config descriptions (ConfigDescriptionProvider)
//!
//! It also ships in-memory implementations of each, used to wire and test
//! the manager end to end.

pub mod entity_registry;
pub mod link_registry;
pub mod type_catalog;

pub use entity_registry::ManagedEntityRegistry;
pub use link_registry::ManagedLinkRegistry;
pub use type_catalog::{CatalogData, TypeCatalog};

use sh_core::{
    ChannelId, ChannelType, ChannelTypeId, ConfigDescription, Entity, EntityId, EntityType,
    EntityTypeId,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur in the registries
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    #[error("Entity already exists: {0}")]
    AlreadyExists(EntityId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Change to the set of entity definitions
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added(Entity),
    Updated { old: Entity, new: Entity },
    Removed(Entity),
}

impl RegistryEvent {
    /// Id of the entity the event is about
    pub fn entity_id(&self) -> &EntityId {
        match self {
            RegistryEvent::Added(entity) | RegistryEvent::Removed(entity) => entity.id(),
            RegistryEvent::Updated { new, .. } => new.id(),
        }
    }
}

/// Change to the channel links
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Added { item: String, channel: ChannelId },
    Removed { item: String, channel: ChannelId },
}

impl LinkEvent {
    pub fn channel(&self) -> &ChannelId {
        match self {
            LinkEvent::Added { channel, .. } | LinkEvent::Removed { channel, .. } => channel,
        }
    }
}

/// Source of entity definitions
pub trait EntityRegistry: Send + Sync {
    fn get(&self, id: &EntityId) -> Option<Entity>;

    /// All entities in registration order
    fn all(&self) -> Vec<Entity>;

    /// Entities whose parent is `parent`
    fn children_of(&self, parent: &EntityId) -> Vec<Entity> {
        self.all()
            .into_iter()
            .filter(|entity| entity.parent() == Some(parent))
            .collect()
    }

    /// Replace an existing definition, returning the previous one
    fn update(&self, entity: Entity) -> RegistryResult<Entity>;

    /// Subscribe to added/updated/removed events
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent>;
}

/// Source of channel link information
pub trait LinkRegistry: Send + Sync {
    /// Check if at least one item is linked to the channel
    fn is_linked(&self, channel: &ChannelId) -> bool;

    fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent>;
}

pub trait EntityTypeProvider: Send + Sync {
    fn entity_type(&self, id: &EntityTypeId) -> Option<EntityType>;
}

pub trait ChannelTypeProvider: Send + Sync {
    fn channel_type(&self, id: &ChannelTypeId) -> Option<ChannelType>;
}

pub trait ConfigDescriptionProvider: Send + Sync {
    fn config_description(&self, uri: &str) -> Option<ConfigDescription>;
}
