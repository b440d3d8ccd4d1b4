//! Entity Manager Server
//!
//! Loads the type catalog and entity definitions, then supervises handler
//! lifecycles until interrupted.

mod config;
mod virtual_binding;

use std::sync::Arc;

use anyhow::Result;
use sh_entity_manager::{Collaborators, EntityManager, HandlerRegistry};
use sh_registries::{ManagedEntityRegistry, ManagedLinkRegistry, TypeCatalog};
use sh_status_store::StatusStore;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::virtual_binding::VirtualHandlerFactory;

/// Everything the server wires together
pub struct SmartHome {
    pub registry: Arc<ManagedEntityRegistry>,
    pub factories: Arc<HandlerRegistry>,
    pub status: Arc<StatusStore>,
    pub manager: EntityManager,
}

impl SmartHome {
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        let catalog = match &config.catalog {
            Some(path) => TypeCatalog::load(path).await?,
            None => TypeCatalog::new(),
        };
        let registry = match &config.entities {
            Some(path) => ManagedEntityRegistry::load(path).await?,
            None => ManagedEntityRegistry::new(),
        };

        let catalog = Arc::new(catalog);
        let registry = Arc::new(registry);
        // Links are created at runtime; none are persisted yet
        let links = Arc::new(ManagedLinkRegistry::new());
        let factories = Arc::new(HandlerRegistry::new());
        let status = Arc::new(StatusStore::new());

        let manager = EntityManager::new(
            config.manager.clone(),
            Collaborators {
                registry: registry.clone(),
                links,
                entity_types: catalog.clone(),
                channel_types: catalog.clone(),
                config_descriptions: catalog,
            },
            factories.clone(),
            status.clone(),
        );

        Ok(Self {
            registry,
            factories,
            status,
            manager,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::discover(std::env::args().nth(1))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting entity manager server");

    let home = SmartHome::load(&config).await?;
    info!(entities = home.registry.len(), "Entity definitions loaded");

    let mut changes = home.status.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => info!(
                    entity_id = %change.entity_id,
                    old = %change.old,
                    new = %change.new,
                    "Entity status"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Status log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    home.factories.register(Arc::new(VirtualHandlerFactory));
    home.manager.start();

    info!("Entity manager server is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    home.manager.shutdown().await;

    Ok(())
}
