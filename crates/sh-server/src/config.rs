//! Server configuration
//!
//! ```yaml
//! log_level: debug
//! catalog: /etc/smarthome/catalog.yaml
//! entities: /etc/smarthome/entities.yaml
//! manager:
//!   safe_call_timeout_ms: 5000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sh_entity_manager::ManagerConfig;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SH_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,

    pub manager: ManagerConfig,

    /// Type catalog (entity types, channel types, config descriptions)
    pub catalog: Option<PathBuf>,

    /// Entity definitions
    pub entities: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            manager: ManagerConfig::default(),
            catalog: None,
            entities: None,
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("invalid server configuration")?;
        config.manager.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Resolve the configuration file from the first argument or `SH_CONFIG`
    ///
    /// Defaults apply when neither names a file.
    pub fn discover(arg: Option<String>) -> Result<Self> {
        match arg.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}
