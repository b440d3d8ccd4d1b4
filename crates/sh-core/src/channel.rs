//! Channel types
//!
//! A Channel is a typed interaction point belonging to exactly one entity.
//! Channels are immutable; [`ChannelBuilder::from_channel`] produces an edit
//! builder seeded from an existing channel.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::configuration::Configuration;
use crate::uid::{ChannelId, ChannelTypeId};

/// Whether a channel carries state or fires trigger events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    #[default]
    State,
    Trigger,
}

/// A channel of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel_type: Option<ChannelTypeId>,
    /// Kind of value accepted by the channel (e.g. "Switch", "Number")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    accepted_item_type: Option<String>,
    #[serde(default)]
    kind: ChannelKind,
    #[serde(default)]
    configuration: Configuration,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    default_tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl Channel {
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn channel_type(&self) -> Option<&ChannelTypeId> {
        self.channel_type.as_ref()
    }

    pub fn accepted_item_type(&self) -> Option<&str> {
        self.accepted_item_type.as_deref()
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn default_tags(&self) -> &BTreeSet<String> {
        &self.default_tags
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Start an edit of this channel
    pub fn edit(&self) -> ChannelBuilder {
        ChannelBuilder::from_channel(self)
    }
}

/// Builder for [`Channel`]
#[derive(Debug, Clone)]
pub struct ChannelBuilder {
    channel: Channel,
}

impl ChannelBuilder {
    /// Start a channel with nothing but its id set
    pub fn create(id: ChannelId) -> Self {
        Self {
            channel: Channel {
                id,
                channel_type: None,
                accepted_item_type: None,
                kind: ChannelKind::State,
                configuration: Configuration::new(),
                default_tags: BTreeSet::new(),
                properties: BTreeMap::new(),
                label: None,
                description: None,
            },
        }
    }

    /// Seed a builder with exactly the fields of an existing channel
    pub fn from_channel(channel: &Channel) -> Self {
        Self {
            channel: channel.clone(),
        }
    }

    pub fn with_type(mut self, channel_type: ChannelTypeId) -> Self {
        self.channel.channel_type = Some(channel_type);
        self
    }

    pub fn with_accepted_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.channel.accepted_item_type = Some(item_type.into());
        self
    }

    pub fn with_kind(mut self, kind: ChannelKind) -> Self {
        self.channel.kind = kind;
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.channel.configuration = configuration;
        self
    }

    pub fn with_default_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel.default_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.channel.properties = properties;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.channel.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.channel.description = Some(description.into());
        self
    }

    pub fn build(self) -> Channel {
        self.channel
    }
}
