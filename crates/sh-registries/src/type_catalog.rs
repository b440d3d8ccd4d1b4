//! In-memory type catalog
//!
//! Serves entity types, channel types and config descriptions, loaded from
//! YAML or registered programmatically by bindings.

use std::path::Path;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sh_core::{ChannelType, ChannelTypeId, ConfigDescription, EntityType, EntityTypeId};
use tracing::info;

use crate::{ChannelTypeProvider, ConfigDescriptionProvider, EntityTypeProvider, RegistryResult};

/// Serialized form of a catalog file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogData {
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub channel_types: Vec<ChannelType>,
    #[serde(default)]
    pub config_descriptions: Vec<ConfigDescription>,
}

/// Catalog of entity types, channel types and config descriptions
#[derive(Default)]
pub struct TypeCatalog {
    entity_types: DashMap<EntityTypeId, EntityType>,
    channel_types: DashMap<ChannelTypeId, ChannelType>,
    config_descriptions: DashMap<String, ConfigDescription>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: CatalogData) -> Self {
        let catalog = Self::new();
        for entity_type in data.entity_types {
            catalog.add_entity_type(entity_type);
        }
        for channel_type in data.channel_types {
            catalog.add_channel_type(channel_type);
        }
        for description in data.config_descriptions {
            catalog.add_config_description(description);
        }
        catalog
    }

    pub fn from_yaml_str(yaml: &str) -> RegistryResult<Self> {
        let data: CatalogData = serde_yaml::from_str(yaml)?;
        Ok(Self::from_data(data))
    }

    /// Load a catalog file
    pub async fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let catalog = Self::from_yaml_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            entity_types = catalog.entity_types.len(),
            channel_types = catalog.channel_types.len(),
            config_descriptions = catalog.config_descriptions.len(),
            "Loaded type catalog"
        );
        Ok(catalog)
    }

    pub fn add_entity_type(&self, entity_type: EntityType) -> Option<EntityType> {
        self.entity_types.insert(entity_type.id.clone(), entity_type)
    }

    pub fn remove_entity_type(&self, id: &EntityTypeId) -> Option<EntityType> {
        self.entity_types.remove(id).map(|(_, t)| t)
    }

    pub fn add_channel_type(&self, channel_type: ChannelType) -> Option<ChannelType> {
        self.channel_types
            .insert(channel_type.id.clone(), channel_type)
    }

    pub fn remove_channel_type(&self, id: &ChannelTypeId) -> Option<ChannelType> {
        self.channel_types.remove(id).map(|(_, t)| t)
    }

    pub fn add_config_description(
        &self,
        description: ConfigDescription,
    ) -> Option<ConfigDescription> {
        self.config_descriptions
            .insert(description.uri.clone(), description)
    }

    pub fn remove_config_description(&self, uri: &str) -> Option<ConfigDescription> {
        self.config_descriptions.remove(uri).map(|(_, d)| d)
    }
}

impl EntityTypeProvider for TypeCatalog {
    fn entity_type(&self, id: &EntityTypeId) -> Option<EntityType> {
        self.entity_types.get(id).map(|t| t.value().clone())
    }
}

impl ChannelTypeProvider for TypeCatalog {
    fn channel_type(&self, id: &ChannelTypeId) -> Option<ChannelType> {
        self.channel_types.get(id).map(|t| t.value().clone())
    }
}

impl ConfigDescriptionProvider for TypeCatalog {
    fn config_description(&self, uri: &str) -> Option<ConfigDescription> {
        self.config_descriptions.get(uri).map(|d| d.value().clone())
    }
}
