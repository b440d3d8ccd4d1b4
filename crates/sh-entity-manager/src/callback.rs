//! Capability object handed to each handler

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use sh_core::{
    ChannelBuilder, ChannelId, ChannelTypeId, Configuration, Entity, EntityId, EntityStatus,
    StatusInfo,
};
use tracing::debug;

use crate::error::CallbackError;
use crate::manager::ManagerInner;

/// Lets a handler talk back to the manager
///
/// One callback exists per handler instance. Once the handler is released the
/// callback goes stale: status reports are ignored and other operations fail
/// with [`CallbackError::Released`]. No method waits for the entity's
/// lifecycle worker, so a handler may call any of them from any of its own
/// methods.
pub struct EntityCallback {
    entity_id: EntityId,
    generation: u64,
    live: AtomicBool,
    manager: Weak<ManagerInner>,
}

impl EntityCallback {
    pub(crate) fn new(entity_id: EntityId, generation: u64, manager: Weak<ManagerInner>) -> Self {
        Self {
            entity_id,
            generation,
            live: AtomicBool::new(true),
            manager,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if the handler owning this callback is still bound
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn release(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn manager(&self) -> Result<std::sync::Arc<ManagerInner>, CallbackError> {
        if !self.is_live() {
            return Err(CallbackError::Released(self.entity_id.clone()));
        }
        self.manager
            .upgrade()
            .ok_or_else(|| CallbackError::Released(self.entity_id.clone()))
    }

    /// Report the handler's view of the entity's status
    ///
    /// Only ONLINE, OFFLINE and UNKNOWN may be reported. Reports from a
    /// released handler are ignored.
    pub fn update_status(&self, info: StatusInfo) -> Result<(), CallbackError> {
        if !matches!(
            info.status,
            EntityStatus::Online | EntityStatus::Offline | EntityStatus::Unknown
        ) {
            return Err(CallbackError::IllegalStatus(info.status));
        }

        match self.manager() {
            Ok(manager) => manager.apply_report(self, info),
            Err(_) => {
                debug!(entity_id = %self.entity_id, status = %info, "Ignoring report from released handler");
                Ok(())
            }
        }
    }

    /// Current status of the entity
    pub fn status(&self) -> StatusInfo {
        match self.manager.upgrade() {
            Some(manager) => manager.status.get(&self.entity_id),
            None => StatusInfo::default(),
        }
    }

    /// Check if at least one item is linked to the channel
    pub fn is_channel_linked(&self, channel: &ChannelId) -> bool {
        self.manager
            .upgrade()
            .map(|manager| manager.links.is_linked(channel))
            .unwrap_or(false)
    }

    /// Start a new channel seeded from its channel type
    pub fn create_channel_builder(
        &self,
        channel_id: ChannelId,
        channel_type: &ChannelTypeId,
    ) -> Result<ChannelBuilder, CallbackError> {
        self.check_own_channel(&channel_id)?;
        let manager = self.manager()?;
        let definition = manager
            .channel_types
            .channel_type(channel_type)
            .ok_or_else(|| CallbackError::ChannelTypeNotFound(channel_type.clone()))?;

        let mut builder = ChannelBuilder::create(channel_id)
            .with_type(definition.id)
            .with_label(definition.label)
            .with_kind(definition.kind)
            .with_default_tags(definition.tags);
        if let Some(description) = definition.description {
            builder = builder.with_description(description);
        }
        if let Some(item_type) = definition.item_type {
            builder = builder.with_accepted_item_type(item_type);
        }
        Ok(builder)
    }

    /// Start an edit of an existing channel of `entity`
    pub fn edit_channel(
        &self,
        entity: &Entity,
        channel_id: &ChannelId,
    ) -> Result<ChannelBuilder, CallbackError> {
        entity
            .channel(channel_id)
            .map(ChannelBuilder::from_channel)
            .ok_or_else(|| CallbackError::ChannelNotFound(channel_id.clone()))
    }

    /// Persist a changed definition of the handler's own entity
    ///
    /// The resulting update is not echoed back to the handler through
    /// `entity_updated`.
    pub fn update_entity(&self, entity: Entity) -> Result<(), CallbackError> {
        if entity.id() != &self.entity_id {
            return Err(CallbackError::ForeignEntity {
                entity_id: entity.id().clone(),
                owner: self.entity_id.clone(),
            });
        }
        let manager = self.manager()?;
        manager.push_entity_update(self, entity)
    }

    /// Ask the manager to re-check the entity's configuration
    pub fn configuration_updated(&self) -> Result<(), CallbackError> {
        let manager = self.manager()?;
        manager.request_evaluation(&self.entity_id);
        Ok(())
    }

    /// Check configuration values against the entity's config description
    pub fn validate_configuration_parameters(
        &self,
        configuration: &Configuration,
    ) -> Result<(), CallbackError> {
        let manager = self.manager()?;
        manager.validate_entity_parameters(&self.entity_id, configuration)
    }

    /// Look up any entity, typically the parent bridge
    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        self.manager
            .upgrade()
            .and_then(|manager| manager.registry.get(id))
    }

    fn check_own_channel(&self, channel_id: &ChannelId) -> Result<(), CallbackError> {
        if channel_id.entity_id() == &self.entity_id {
            Ok(())
        } else {
            Err(CallbackError::ForeignChannel {
                channel: channel_id.clone(),
                entity_id: self.entity_id.clone(),
            })
        }
    }
}

impl std::fmt::Debug for EntityCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCallback")
            .field("entity_id", &self.entity_id)
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}
