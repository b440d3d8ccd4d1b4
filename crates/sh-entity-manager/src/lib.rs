//! Entity lifecycle manager
//!
//! Binds pluggable handlers to the entities of a registry and supervises
//! their lifecycle:
//! - Configuration gating (ConfigValidationGate)
//! - Handler lookup (HandlerRegistry of HandlerFactory)
//! - Per-entity serialized lifecycle with timeouts (EntityManager)
//! - Handler-to-manager capability (EntityCallback)
//!
//! Statuses are recorded in a shared `sh_status_store::StatusStore`.

mod callback;
pub mod config;
mod error;
mod factory_registry;
mod gate;
mod handler;
mod manager;

pub use callback::EntityCallback;
pub use config::{ConfigError, ConfigResult, ManagerConfig};
pub use error::{CallbackError, HandlerError, HandlerResult, ManagerError, ManagerResult};
pub use factory_registry::{FactoryEvent, FactoryId, HandlerRegistry};
pub use gate::{
    ConfigScope, ConfigValidationError, ConfigValidationGate, MissingParameter, ParameterError,
    ParameterViolation, Validation,
};
pub use handler::{EntityHandler, HandlerFactory};
pub use manager::{Collaborators, EntityManager};
