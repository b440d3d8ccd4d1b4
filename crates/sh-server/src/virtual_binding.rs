//! Built-in `virtual` binding
//!
//! Handlers for entities of the `virtual` binding have no device behind
//! them: they go ONLINE on initialize and log the commands they receive.

use std::sync::Arc;

use sh_core::{ChannelId, Command, Entity, EntityTypeId, StatusInfo};
use sh_entity_manager::{
    EntityCallback, EntityHandler, HandlerError, HandlerFactory, HandlerResult,
};
use tracing::info;

pub const BINDING: &str = "virtual";

pub struct VirtualHandlerFactory;

impl HandlerFactory for VirtualHandlerFactory {
    fn supports(&self, entity_type: &EntityTypeId) -> bool {
        entity_type.binding() == BINDING
    }

    fn create_handler(
        &self,
        _entity: &Entity,
        callback: Arc<EntityCallback>,
    ) -> Option<Arc<dyn EntityHandler>> {
        Some(Arc::new(VirtualHandler { callback }))
    }
}

struct VirtualHandler {
    callback: Arc<EntityCallback>,
}

impl EntityHandler for VirtualHandler {
    fn initialize(&self) -> HandlerResult {
        self.callback
            .update_status(StatusInfo::online())
            .map_err(|e| HandlerError::failed(e.to_string()))
    }

    fn handle_command(&self, channel: &ChannelId, command: &Command) -> HandlerResult {
        info!(channel = %channel, command = %command, "Virtual command");
        Ok(())
    }
}
