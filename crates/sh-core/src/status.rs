//! Entity status types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    /// No handler is running for the entity
    #[default]
    Uninitialized,
    /// The handler's initialize routine has been invoked
    Initializing,
    /// Handler is running but has not determined the device state yet
    Unknown,
    /// Handler is running and the device is reachable
    Online,
    /// Handler is running but the device is not reachable
    Offline,
    /// The handler is being disposed
    Uninitializing,
}

impl EntityStatus {
    /// Check if the handler has completed initialization
    ///
    /// ONLINE, OFFLINE and UNKNOWN all mean the handler is up and able to
    /// serve children and commands.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            EntityStatus::Online | EntityStatus::Offline | EntityStatus::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Uninitialized => "UNINITIALIZED",
            EntityStatus::Initializing => "INITIALIZING",
            EntityStatus::Unknown => "UNKNOWN",
            EntityStatus::Online => "ONLINE",
            EntityStatus::Offline => "OFFLINE",
            EntityStatus::Uninitializing => "UNINITIALIZING",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explains why an entity holds its current status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusDetail {
    #[default]
    None,
    /// No handler factory supports the entity type
    HandlerMissingError,
    /// A factory was found but did not produce a handler
    HandlerRegisteringError,
    /// The handler's initialize routine failed
    HandlerInitializingError,
    /// Required configuration parameters are missing
    HandlerConfigurationPending,
    /// A handler call did not finish within its time bound
    HandlerTimeout,
    /// Handler reported that configuration is still being completed
    ConfigurationPending,
    /// Handler rejected its configuration
    ConfigurationError,
    CommunicationError,
    /// The parent bridge is not online
    BridgeOffline,
    /// Initialization waits for the parent bridge to be running
    BridgeUninitialized,
    /// The device has disappeared
    Gone,
}

impl StatusDetail {
    /// Check if the detail carries a reason
    pub fn is_specified(&self) -> bool {
        *self != StatusDetail::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusDetail::None => "NONE",
            StatusDetail::HandlerMissingError => "HANDLER_MISSING_ERROR",
            StatusDetail::HandlerRegisteringError => "HANDLER_REGISTERING_ERROR",
            StatusDetail::HandlerInitializingError => "HANDLER_INITIALIZING_ERROR",
            StatusDetail::HandlerConfigurationPending => "HANDLER_CONFIGURATION_PENDING",
            StatusDetail::HandlerTimeout => "HANDLER_TIMEOUT",
            StatusDetail::ConfigurationPending => "CONFIGURATION_PENDING",
            StatusDetail::ConfigurationError => "CONFIGURATION_ERROR",
            StatusDetail::CommunicationError => "COMMUNICATION_ERROR",
            StatusDetail::BridgeOffline => "BRIDGE_OFFLINE",
            StatusDetail::BridgeUninitialized => "BRIDGE_UNINITIALIZED",
            StatusDetail::Gone => "GONE",
        }
    }
}

impl fmt::Display for StatusDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record of one entity: status, detail and an optional description
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusInfo {
    pub status: EntityStatus,
    #[serde(default)]
    pub detail: StatusDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StatusInfo {
    pub fn new(status: EntityStatus, detail: StatusDetail) -> Self {
        Self {
            status,
            detail,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn online() -> Self {
        Self::new(EntityStatus::Online, StatusDetail::None)
    }

    pub fn offline(detail: StatusDetail) -> Self {
        Self::new(EntityStatus::Offline, detail)
    }

    pub fn unknown() -> Self {
        Self::new(EntityStatus::Unknown, StatusDetail::None)
    }

    pub fn uninitialized(detail: StatusDetail) -> Self {
        Self::new(EntityStatus::Uninitialized, detail)
    }

    pub fn initializing() -> Self {
        Self::new(EntityStatus::Initializing, StatusDetail::None)
    }

    pub fn uninitializing() -> Self {
        Self::new(EntityStatus::Uninitializing, StatusDetail::None)
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

impl fmt::Display for StatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.status, self.detail)?;
        if let Some(ref description) = self.description {
            write!(f, " ({})", description)?;
        }
        Ok(())
    }
}
