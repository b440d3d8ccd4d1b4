//! In-memory Link Registry
//!
//! Tracks which items are linked to which channels.

use std::collections::BTreeSet;

use dashmap::DashMap;
use sh_core::{ChannelId, EntityId, Notifier};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{LinkEvent, LinkRegistry};

/// Link registry keyed by channel
pub struct ManagedLinkRegistry {
    links: DashMap<ChannelId, BTreeSet<String>>,
    notifier: Notifier<LinkEvent>,
}

impl ManagedLinkRegistry {
    pub fn new() -> Self {
        Self {
            links: DashMap::new(),
            notifier: Notifier::new(),
        }
    }

    /// Link an item to a channel
    ///
    /// Returns `false` if the link already existed.
    pub fn link(&self, item: impl Into<String>, channel: ChannelId) -> bool {
        let item = item.into();
        let mut items = self.links.entry(channel.clone()).or_default();
        if !items.insert(item.clone()) {
            return false;
        }
        debug!(item = %item, channel = %channel, "Linked");
        self.notifier.notify(LinkEvent::Added { item, channel });
        true
    }

    /// Remove a link
    pub fn unlink(&self, item: &str, channel: &ChannelId) -> bool {
        let removed = match self.links.get_mut(channel) {
            Some(mut items) => {
                let removed = items.remove(item);
                if removed {
                    debug!(item, channel = %channel, "Unlinked");
                    self.notifier.notify(LinkEvent::Removed {
                        item: item.to_string(),
                        channel: channel.clone(),
                    });
                }
                removed
            }
            None => false,
        };
        self.links.remove_if(channel, |_, items| items.is_empty());
        removed
    }

    /// Items linked to a channel
    pub fn linked_items(&self, channel: &ChannelId) -> Vec<String> {
        self.links
            .get(channel)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Channels of an entity with at least one link
    pub fn linked_channels(&self, entity_id: &EntityId) -> Vec<ChannelId> {
        self.links
            .iter()
            .filter(|r| r.key().entity_id() == entity_id && !r.value().is_empty())
            .map(|r| r.key().clone())
            .collect()
    }
}

impl Default for ManagedLinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkRegistry for ManagedLinkRegistry {
    fn is_linked(&self, channel: &ChannelId) -> bool {
        self.links
            .get(channel)
            .map(|items| !items.is_empty())
            .unwrap_or(false)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        self.notifier.subscribe()
    }
}
