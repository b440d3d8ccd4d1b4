//! Manager configuration
//!
//! Parses the `manager:` section of the server configuration, or a
//! standalone YAML file with the same keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Time bounds used by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bound for handler lifecycle calls (initialize, dispose, notifications)
    pub safe_call_timeout_ms: u64,

    /// Bound for handler creation by a factory
    pub factory_timeout_ms: u64,

    /// Bound for disposing all handlers on shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            safe_call_timeout_ms: 5000,
            factory_timeout_ms: 5000,
            shutdown_timeout_ms: 10000,
        }
    }
}

impl ManagerConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Reject zero time bounds
    pub fn validate(&self) -> ConfigResult<()> {
        for (key, value) in [
            ("safe_call_timeout_ms", self.safe_call_timeout_ms),
            ("factory_timeout_ms", self.factory_timeout_ms),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn safe_call_timeout(&self) -> Duration {
        Duration::from_millis(self.safe_call_timeout_ms)
    }

    pub fn factory_timeout(&self) -> Duration {
        Duration::from_millis(self.factory_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
