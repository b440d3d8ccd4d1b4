//! Handler Registry
//!
//! Ordered lookup table of handler factories. Factories appear and
//! disappear at runtime; subscribers are told about both.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use sh_core::{EntityTypeId, Notifier};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::handler::HandlerFactory;

/// Identifies a registered factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FactoryId(u64);

impl std::fmt::Display for FactoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "factory-{}", self.0)
    }
}

/// Change to the set of factories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryEvent {
    Registered(FactoryId),
    Unregistered(FactoryId),
}

/// Registry of handler factories in registration order
pub struct HandlerRegistry {
    factories: RwLock<Vec<(FactoryId, Arc<dyn HandlerFactory>)>>,
    notifier: Notifier<FactoryEvent>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(Vec::new()),
            notifier: Notifier::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, factory: Arc<dyn HandlerFactory>) -> FactoryId {
        let id = FactoryId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        factories.push((id, factory));
        info!(factory = %id, "Registered handler factory");
        self.notifier.notify(FactoryEvent::Registered(id));
        id
    }

    pub fn unregister(&self, id: FactoryId) -> bool {
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        let before = factories.len();
        factories.retain(|(factory_id, _)| *factory_id != id);
        if factories.len() == before {
            return false;
        }
        info!(factory = %id, "Unregistered handler factory");
        self.notifier.notify(FactoryEvent::Unregistered(id));
        true
    }

    /// First factory, in registration order, that supports the type
    pub fn factory_for(
        &self,
        entity_type: &EntityTypeId,
    ) -> Option<(FactoryId, Arc<dyn HandlerFactory>)> {
        // Snapshot so `supports` runs without the lock held
        let factories = self
            .factories
            .read()
            .map(|factories| factories.clone())
            .unwrap_or_default();
        let found = factories
            .into_iter()
            .find(|(_, factory)| factory.supports(entity_type));
        debug!(
            entity_type = %entity_type,
            factory = ?found.as_ref().map(|(id, _)| *id),
            "Factory lookup"
        );
        found
    }

    pub fn contains(&self, id: FactoryId) -> bool {
        self.factories
            .read()
            .map(|factories| factories.iter().any(|(factory_id, _)| *factory_id == id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.factories.read().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FactoryEvent> {
        self.notifier.subscribe()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
