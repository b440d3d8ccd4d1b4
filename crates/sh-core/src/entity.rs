//! Entity definition types
//!
//! An Entity is a managed device or service instance. Its definition is
//! owned by the entity registry; the lifecycle status lives in the status
//! store, not here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use crate::channel::Channel;
use crate::configuration::Configuration;
use crate::uid::{ChannelId, EntityId, EntityTypeId};

/// Errors raised when building an inconsistent entity definition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("duplicate channel {0}")]
    DuplicateChannel(ChannelId),

    #[error("channel {channel} does not belong to entity {entity}")]
    ForeignChannel { channel: ChannelId, entity: EntityId },

    #[error("entity {0} cannot be its own parent")]
    SelfParent(EntityId),
}

/// Definition of a managed entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    entity_type: EntityTypeId,
    /// Bridge this entity is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    configuration: Configuration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn parent(&self) -> Option<&EntityId> {
        self.parent.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Channels in declaration order
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id() == id)
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Start a copy-on-write edit of this definition
    pub fn edit(&self) -> EntityBuilder {
        EntityBuilder {
            entity: self.clone(),
        }
    }
}

/// Builder for [`Entity`]
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    entity: Entity,
}

impl EntityBuilder {
    pub fn create(entity_type: EntityTypeId, id: EntityId) -> Self {
        Self {
            entity: Entity {
                id,
                entity_type,
                parent: None,
                label: None,
                channels: Vec::new(),
                configuration: Configuration::new(),
                properties: BTreeMap::new(),
            },
        }
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.entity.parent = Some(parent);
        self
    }

    pub fn without_parent(mut self) -> Self {
        self.entity.parent = None;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity.label = Some(label.into());
        self
    }

    /// Replace all channels
    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.entity.channels = channels;
        self
    }

    /// Add a channel, replacing an existing channel with the same id in place
    pub fn with_channel(mut self, channel: Channel) -> Self {
        match self
            .entity
            .channels
            .iter_mut()
            .find(|c| c.id() == channel.id())
        {
            Some(existing) => *existing = channel,
            None => self.entity.channels.push(channel),
        }
        self
    }

    pub fn without_channel(mut self, id: &ChannelId) -> Self {
        self.entity.channels.retain(|c| c.id() != id);
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.entity.configuration = configuration;
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.entity.properties = properties;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entity.properties.insert(key.into(), value.into());
        self
    }

    /// Validate and build the entity
    pub fn build(self) -> Result<Entity, BuilderError> {
        let entity = self.entity;

        if entity.parent.as_ref() == Some(&entity.id) {
            return Err(BuilderError::SelfParent(entity.id));
        }

        let mut seen = HashSet::new();
        for channel in &entity.channels {
            if channel.id().entity_id() != &entity.id {
                return Err(BuilderError::ForeignChannel {
                    channel: channel.id().clone(),
                    entity: entity.id.clone(),
                });
            }
            if !seen.insert(channel.id()) {
                return Err(BuilderError::DuplicateChannel(channel.id().clone()));
            }
        }

        Ok(entity)
    }
}
