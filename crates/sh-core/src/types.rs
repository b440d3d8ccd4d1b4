//! Descriptive type catalog records
//!
//! Entity types and channel types describe what a binding offers; config
//! descriptions list the parameters an entity or channel accepts. They are
//! read-only metadata served by the type providers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::channel::ChannelKind;
use crate::uid::{ChannelTypeId, EntityTypeId};

/// Channel declared by an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub id: String,
    pub channel_type: ChannelTypeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Kind of entity a binding supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: EntityTypeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bridge types this entity can be attached to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_bridge_types: Vec<EntityTypeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_description_uri: Option<String>,
    #[serde(default)]
    pub channel_definitions: Vec<ChannelDefinition>,
}

impl EntityType {
    pub fn new(id: EntityTypeId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            supported_bridge_types: Vec::new(),
            config_description_uri: None,
            channel_definitions: Vec::new(),
        }
    }

    pub fn with_config_description(mut self, uri: impl Into<String>) -> Self {
        self.config_description_uri = Some(uri.into());
        self
    }

    pub fn with_channel(mut self, id: impl Into<String>, channel_type: ChannelTypeId) -> Self {
        self.channel_definitions.push(ChannelDefinition {
            id: id.into(),
            channel_type,
            label: None,
        });
        self
    }

    pub fn with_bridge_type(mut self, bridge_type: EntityTypeId) -> Self {
        self.supported_bridge_types.push(bridge_type);
        self
    }
}

/// Kind of channel a binding supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelType {
    pub id: ChannelTypeId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_description_uri: Option<String>,
}

impl ChannelType {
    pub fn new(id: ChannelTypeId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            description: None,
            item_type: None,
            kind: ChannelKind::State,
            tags: BTreeSet::new(),
            category: None,
            config_description_uri: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = Some(item_type.into());
        self
    }

    pub fn with_kind(mut self, kind: ChannelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_config_description(mut self, uri: impl Into<String>) -> Self {
        self.config_description_uri = Some(uri.into());
        self
    }
}

/// Value type of a configuration parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
    #[default]
    Text,
    Integer,
    Decimal,
    Boolean,
}

/// Allowed value of a parameter with options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One parameter of a config description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDescriptionParameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Lower bound: value for numbers, length for text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound: value for numbers, length for text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Regular expression the whole text value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ParameterOption>,
    #[serde(default = "default_limit_to_options")]
    pub limit_to_options: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn default_limit_to_options() -> bool {
    true
}

impl ConfigDescriptionParameter {
    pub fn new(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            pattern: None,
            options: Vec::new(),
            limit_to_options: true,
            label: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options
            .into_iter()
            .map(|value| ParameterOption {
                value: value.into(),
                label: None,
            })
            .collect();
        self
    }

    /// Check if a JSON value matches one of the options
    pub fn is_option(&self, value: &Value) -> bool {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.options.iter().any(|option| option.value == text)
    }
}

/// Parameters accepted by an entity or channel, addressed by URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDescription {
    pub uri: String,
    #[serde(default)]
    pub parameters: Vec<ConfigDescriptionParameter>,
}

impl ConfigDescription {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ConfigDescriptionParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ConfigDescriptionParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ConfigDescriptionParameter> {
        self.parameters.iter().filter(|p| p.required)
    }
}
