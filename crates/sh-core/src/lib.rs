//! Core types for the entity lifecycle manager
//!
//! This crate provides the fundamental types shared by every other crate:
//! identifiers, Entity and Channel definitions with their builders,
//! configuration, the status model with its transition rules, the type
//! catalog records, and the Notifier subscribe/notify primitive.

mod channel;
mod command;
mod configuration;
mod entity;
mod notify;
mod state_machine;
mod status;
mod types;
mod uid;

pub use channel::{Channel, ChannelBuilder, ChannelKind};
pub use command::Command;
pub use configuration::Configuration;
pub use entity::{BuilderError, Entity, EntityBuilder};
pub use notify::Notifier;
pub use state_machine::InvalidTransition;
pub use status::{EntityStatus, StatusDetail, StatusInfo};
pub use types::{
    ChannelDefinition, ChannelType, ConfigDescription, ConfigDescriptionParameter, EntityType,
    ParameterOption, ParameterType,
};
pub use uid::{ChannelId, ChannelTypeId, EntityId, EntityTypeId, UidError, GROUP_SEPARATOR, SEPARATOR};
