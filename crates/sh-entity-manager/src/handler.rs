//! Handler and factory traits implemented by bindings

use std::sync::Arc;

use sh_core::{ChannelId, Command, Entity, EntityTypeId, StatusInfo};

use crate::callback::EntityCallback;
use crate::error::HandlerResult;

/// Behavior bound to one entity
///
/// All methods are invoked on the blocking pool with a time bound, one at a
/// time per entity. Implementations may block, fail or panic; the manager
/// turns every outcome into a status. A handler reports its progress through
/// the [`EntityCallback`] it was created with, typically from `initialize`
/// or from a background thread it started there.
pub trait EntityHandler: Send + Sync {
    /// Start the handler
    ///
    /// Returning `Ok` without reporting a status leaves the entity
    /// INITIALIZING until the handler reports one.
    fn initialize(&self) -> HandlerResult;

    /// Release everything the handler holds
    fn dispose(&self) -> HandlerResult {
        Ok(())
    }

    fn handle_command(&self, _channel: &ChannelId, _command: &Command) -> HandlerResult {
        Ok(())
    }

    /// The entity definition changed while the handler was running
    fn entity_updated(&self, _entity: &Entity) -> HandlerResult {
        Ok(())
    }

    /// A child's handler reached a running status for the first time
    fn child_handler_initialized(
        &self,
        _child_handler: Arc<dyn EntityHandler>,
        _child_entity: &Entity,
    ) -> HandlerResult {
        Ok(())
    }

    /// A child's handler was disposed
    fn child_handler_disposed(
        &self,
        _child_handler: Arc<dyn EntityHandler>,
        _child_entity: &Entity,
    ) -> HandlerResult {
        Ok(())
    }

    /// The parent bridge changed status
    fn bridge_status_changed(&self, _bridge_status: &StatusInfo) -> HandlerResult {
        Ok(())
    }

    fn channel_linked(&self, _channel: &ChannelId) -> HandlerResult {
        Ok(())
    }

    fn channel_unlinked(&self, _channel: &ChannelId) -> HandlerResult {
        Ok(())
    }
}

/// Creates handlers for the entity types it supports
pub trait HandlerFactory: Send + Sync {
    fn supports(&self, entity_type: &EntityTypeId) -> bool;

    /// Create a handler bound to `callback`
    ///
    /// Returning `None` marks the entity `HANDLER_REGISTERING_ERROR`.
    fn create_handler(
        &self,
        entity: &Entity,
        callback: Arc<EntityCallback>,
    ) -> Option<Arc<dyn EntityHandler>>;
}
