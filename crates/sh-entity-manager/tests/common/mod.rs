//! Shared fixtures for the entity manager integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use sh_core::{
    ChannelBuilder, ChannelId, ChannelKind, ChannelType, ChannelTypeId, Command,
    ConfigDescription, ConfigDescriptionParameter, Configuration, Entity, EntityBuilder, EntityId,
    EntityStatus, EntityType, EntityTypeId, ParameterType, StatusDetail, StatusInfo,
};
use sh_entity_manager::{
    Collaborators, EntityCallback, EntityHandler, EntityManager, HandlerError, HandlerFactory,
    HandlerRegistry, HandlerResult, ManagerConfig,
};
use sh_registries::{ManagedEntityRegistry, ManagedLinkRegistry, TypeCatalog};
use sh_status_store::StatusStore;

pub const BINDING: &str = "test";
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Ids and definitions
// ============================================================================

pub fn type_id(id: &str) -> EntityTypeId {
    EntityTypeId::new(BINDING, id).unwrap()
}

pub fn switch_type() -> ChannelTypeId {
    ChannelTypeId::new(BINDING, "switch").unwrap()
}

pub fn entity_id(entity_type: &str, id: &str) -> EntityId {
    EntityId::new(&type_id(entity_type), id).unwrap()
}

pub fn power_channel(entity: &EntityId) -> ChannelId {
    ChannelId::new(entity, "power").unwrap()
}

/// Configuration satisfying the switch channel type
pub fn switch_config() -> Configuration {
    Configuration::new().with("interval", 30)
}

pub fn host_config() -> Configuration {
    Configuration::new().with("host", "10.0.0.7")
}

/// Lamp with its required `host` set and one configured switch channel
pub fn lamp(id: &str) -> Entity {
    lamp_with(id, host_config())
}

pub fn lamp_with(id: &str, configuration: Configuration) -> Entity {
    lamp_with_channel(id, configuration, switch_config())
}

pub fn lamp_with_channel(
    id: &str,
    configuration: Configuration,
    channel_configuration: Configuration,
) -> Entity {
    let entity_id = entity_id("lamp", id);
    EntityBuilder::create(type_id("lamp"), entity_id.clone())
        .with_label(format!("Lamp {}", id))
        .with_configuration(configuration)
        .with_channel(
            ChannelBuilder::create(power_channel(&entity_id))
                .with_type(switch_type())
                .with_accepted_item_type("Switch")
                .with_configuration(channel_configuration)
                .build(),
        )
        .build()
        .unwrap()
}

pub fn bridge(id: &str) -> Entity {
    EntityBuilder::create(type_id("bridge"), entity_id("bridge", id))
        .build()
        .unwrap()
}

pub fn sensor(id: &str, parent: &EntityId) -> Entity {
    EntityBuilder::create(type_id("sensor"), entity_id("sensor", id))
        .with_parent(parent.clone())
        .build()
        .unwrap()
}

/// Sensor not attached to any bridge
pub fn lone_sensor(id: &str) -> Entity {
    EntityBuilder::create(type_id("sensor"), entity_id("sensor", id))
        .build()
        .unwrap()
}

pub fn catalog() -> Arc<TypeCatalog> {
    let catalog = TypeCatalog::new();
    catalog.add_entity_type(
        EntityType::new(type_id("lamp"), "Lamp")
            .with_config_description("entity-type:test:lamp")
            .with_channel("power", switch_type()),
    );
    catalog.add_entity_type(EntityType::new(type_id("bridge"), "Bridge"));
    catalog.add_entity_type(
        EntityType::new(type_id("sensor"), "Sensor").with_bridge_type(type_id("bridge")),
    );
    catalog.add_channel_type(
        ChannelType::new(switch_type(), "Power")
            .with_description("Turns the device on or off")
            .with_item_type("Switch")
            .with_kind(ChannelKind::State)
            .with_tag("Switchable")
            .with_config_description("channel-type:test:switch"),
    );
    catalog.add_config_description(
        ConfigDescription::new("entity-type:test:lamp")
            .with_parameter(ConfigDescriptionParameter::new("host", ParameterType::Text).required())
            .with_parameter(
                ConfigDescriptionParameter::new("port", ParameterType::Integer)
                    .with_range(Some(1.0), Some(65535.0)),
            ),
    );
    catalog.add_config_description(
        ConfigDescription::new("channel-type:test:switch").with_parameter(
            ConfigDescriptionParameter::new("interval", ParameterType::Decimal).required(),
        ),
    );
    Arc::new(catalog)
}

// ============================================================================
// Recording handler
// ============================================================================

/// Records every handler invocation as `(entity, event)`
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(EntityId, String)>>,
}

impl Recorder {
    pub fn record(&self, entity_id: &EntityId, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap()
            .push((entity_id.clone(), event.into()));
    }

    pub fn events_for(&self, entity_id: &EntityId) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == entity_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn count(&self, entity_id: &EntityId, event: &str) -> usize {
        self.events_for(entity_id)
            .iter()
            .filter(|e| e.as_str() == event)
            .count()
    }

    pub fn has(&self, entity_id: &EntityId, event: &str) -> bool {
        self.count(entity_id, event) > 0
    }

    pub async fn wait_for(&self, entity_id: &EntityId, event: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.has(entity_id, event) {
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "{} never recorded '{}', got {:?}",
                    entity_id,
                    event,
                    self.events_for(entity_id)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub type InitHook = Arc<dyn Fn(&EntityCallback) -> HandlerResult + Send + Sync>;

/// What a test handler does in `initialize`
#[derive(Clone)]
pub enum Init {
    Report(StatusInfo),
    /// Return without reporting a status
    Silent,
    Fail(&'static str),
    Panic(&'static str),
    /// Block, then report
    Slow(Duration, StatusInfo),
    Hook(InitHook),
}

pub struct TestHandler {
    entity_id: EntityId,
    callback: Arc<EntityCallback>,
    init: Init,
    recorder: Arc<Recorder>,
}

impl EntityHandler for TestHandler {
    fn initialize(&self) -> HandlerResult {
        self.recorder.record(&self.entity_id, "initialize");
        match &self.init {
            Init::Report(status) => self
                .callback
                .update_status(status.clone())
                .map_err(|e| HandlerError::failed(e.to_string())),
            Init::Silent => Ok(()),
            Init::Fail(message) => Err(HandlerError::failed(*message)),
            Init::Panic(message) => panic!("{}", message),
            Init::Slow(delay, status) => {
                std::thread::sleep(*delay);
                self.recorder.record(&self.entity_id, "initialize finished");
                self.callback
                    .update_status(status.clone())
                    .map_err(|e| HandlerError::failed(e.to_string()))
            }
            Init::Hook(hook) => hook(&self.callback),
        }
    }

    fn dispose(&self) -> HandlerResult {
        self.recorder.record(&self.entity_id, "dispose");
        Ok(())
    }

    fn handle_command(&self, channel: &ChannelId, command: &Command) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("command {} {}", channel.id(), command));
        Ok(())
    }

    fn entity_updated(&self, entity: &Entity) -> HandlerResult {
        self.recorder.record(
            &self.entity_id,
            format!("updated channels={}", entity.channels().len()),
        );
        Ok(())
    }

    fn child_handler_initialized(
        &self,
        _child_handler: Arc<dyn EntityHandler>,
        child_entity: &Entity,
    ) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("child initialized {}", child_entity.id()));
        Ok(())
    }

    fn child_handler_disposed(
        &self,
        _child_handler: Arc<dyn EntityHandler>,
        child_entity: &Entity,
    ) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("child disposed {}", child_entity.id()));
        Ok(())
    }

    fn bridge_status_changed(&self, bridge_status: &StatusInfo) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("bridge {}", bridge_status.status));
        Ok(())
    }

    fn channel_linked(&self, channel: &ChannelId) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("linked {}", channel.id()));
        Ok(())
    }

    fn channel_unlinked(&self, channel: &ChannelId) -> HandlerResult {
        self.recorder
            .record(&self.entity_id, format!("unlinked {}", channel.id()));
        Ok(())
    }
}

/// Factory for the listed entity types of the test binding
pub struct TestFactory {
    types: Vec<&'static str>,
    default_init: Init,
    overrides: Mutex<HashMap<EntityId, Init>>,
    callbacks: Mutex<HashMap<EntityId, Arc<EntityCallback>>>,
    pub recorder: Arc<Recorder>,
}

impl TestFactory {
    pub fn new(types: &[&'static str], recorder: Arc<Recorder>) -> Self {
        Self {
            types: types.to_vec(),
            default_init: Init::Report(StatusInfo::online()),
            overrides: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            recorder,
        }
    }

    pub fn with_init(self, entity_id: &EntityId, init: Init) -> Self {
        self.overrides
            .lock()
            .unwrap()
            .insert(entity_id.clone(), init);
        self
    }

    /// Callback handed to the most recent handler of an entity
    pub fn callback(&self, entity_id: &EntityId) -> Arc<EntityCallback> {
        self.callbacks
            .lock()
            .unwrap()
            .get(entity_id)
            .cloned()
            .unwrap_or_else(|| panic!("no handler was created for {}", entity_id))
    }

    pub fn created(&self, entity_id: &EntityId) -> bool {
        self.callbacks.lock().unwrap().contains_key(entity_id)
    }
}

impl HandlerFactory for TestFactory {
    fn supports(&self, entity_type: &EntityTypeId) -> bool {
        entity_type.binding() == BINDING && self.types.contains(&entity_type.id())
    }

    fn create_handler(
        &self,
        entity: &Entity,
        callback: Arc<EntityCallback>,
    ) -> Option<Arc<dyn EntityHandler>> {
        let init = self
            .overrides
            .lock()
            .unwrap()
            .get(entity.id())
            .cloned()
            .unwrap_or_else(|| self.default_init.clone());
        self.callbacks
            .lock()
            .unwrap()
            .insert(entity.id().clone(), callback.clone());
        Some(Arc::new(TestHandler {
            entity_id: entity.id().clone(),
            callback,
            init,
            recorder: self.recorder.clone(),
        }))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A manager wired to in-memory collaborators
pub struct Harness {
    pub registry: Arc<ManagedEntityRegistry>,
    pub links: Arc<ManagedLinkRegistry>,
    pub catalog: Arc<TypeCatalog>,
    pub factories: Arc<HandlerRegistry>,
    pub status: Arc<StatusStore>,
    pub manager: EntityManager,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig {
            safe_call_timeout_ms: 2000,
            factory_timeout_ms: 2000,
            shutdown_timeout_ms: 5000,
        })
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let registry = Arc::new(ManagedEntityRegistry::new());
        let links = Arc::new(ManagedLinkRegistry::new());
        let catalog = catalog();
        let factories = Arc::new(HandlerRegistry::new());
        let status = Arc::new(StatusStore::new());

        let manager = EntityManager::new(
            config,
            Collaborators {
                registry: registry.clone(),
                links: links.clone(),
                entity_types: catalog.clone(),
                channel_types: catalog.clone(),
                config_descriptions: catalog.clone(),
            },
            factories.clone(),
            status.clone(),
        );

        Self {
            registry,
            links,
            catalog,
            factories,
            status,
            manager,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn factory(&self, types: &[&'static str]) -> TestFactory {
        TestFactory::new(types, self.recorder.clone())
    }

    /// Wait until the entity reaches `status` with `detail`
    pub async fn wait_for(
        &self,
        entity_id: &EntityId,
        status: EntityStatus,
        detail: StatusDetail,
    ) -> StatusInfo {
        match self
            .manager
            .wait_for_status(entity_id, WAIT, |info| {
                info.status == status && info.detail == detail
            })
            .await
        {
            Some(info) => info,
            None => panic!(
                "{} never reached {}/{}, last status {}",
                entity_id,
                status,
                detail.as_str(),
                self.manager.status(entity_id)
            ),
        }
    }

    pub async fn wait_online(&self, entity_id: &EntityId) -> StatusInfo {
        self.wait_for(entity_id, EntityStatus::Online, StatusDetail::None)
            .await
    }
}

/// Slot for handing the manager to handler code created before it exists
pub type ManagerSlot = Arc<OnceLock<EntityManager>>;
