//! Error types for the entity manager

use sh_core::{ChannelId, ChannelTypeId, EntityId, EntityStatus, InvalidTransition};
use sh_registries::RegistryError;
use sh_safe_caller::SafeCallError;
use thiserror::Error;

use crate::gate::ConfigValidationError;

/// Result type for handler methods
pub type HandlerResult = Result<(), HandlerError>;

/// Failure reported by handler code
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// Errors returned by [`EntityManager`](crate::EntityManager) operations
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("Handler of {entity_id} is not initialized (status {status})")]
    NotInitialized {
        entity_id: EntityId,
        status: EntityStatus,
    },

    #[error("Manager is shut down")]
    ShutDown,

    #[error("Handler call failed: {0}")]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    SafeCall(#[from] SafeCallError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors returned to handlers by [`EntityCallback`](crate::EntityCallback)
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Handlers may only report ONLINE, OFFLINE or UNKNOWN
    #[error("Handler cannot report status {0}")]
    IllegalStatus(EntityStatus),

    #[error("Callback of {0} is no longer valid")]
    Released(EntityId),

    #[error("Channel type not found: {0}")]
    ChannelTypeNotFound(ChannelTypeId),

    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("Channel {channel} does not belong to entity {entity_id}")]
    ForeignChannel {
        channel: ChannelId,
        entity_id: EntityId,
    },

    #[error("Entity {entity_id} is not owned by the handler of {owner}")]
    ForeignEntity { entity_id: EntityId, owner: EntityId },

    #[error(transparent)]
    InvalidConfiguration(#[from] ConfigValidationError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
