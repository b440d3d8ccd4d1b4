//! Entity Manager
//!
//! Drives the handler lifecycle of every entity in the registry:
//!
//! ```text
//! added/updated → validate config → find factory → create handler
//!               → wait for running parent → INITIALIZING → initialize()
//!               → handler reports ONLINE | OFFLINE | UNKNOWN
//! removed       → UNINITIALIZING → dispose() → UNINITIALIZED
//! ```
//!
//! Each entity has a worker task draining a FIFO queue of lifecycle
//! operations, so operations on one entity are serialized while different
//! entities proceed in parallel. Handler code runs through the SafeCaller.
//! Anything a handler triggers through its callback is queued, never waited
//! for, so handlers may re-enter the manager from any of their methods.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use sh_core::{
    ChannelId, Command, Configuration, Entity, EntityId, EntityStatus, InvalidTransition,
    StatusDetail, StatusInfo,
};
use sh_registries::{
    ChannelTypeProvider, ConfigDescriptionProvider, EntityRegistry, EntityTypeProvider, LinkEvent,
    LinkRegistry, RegistryEvent,
};
use sh_safe_caller::{SafeCallError, SafeCaller};
use sh_status_store::{ObserverId, StatusChange, StatusObserver, StatusStore};
use tokio::sync::{mpsc, oneshot};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::callback::EntityCallback;
use crate::config::ManagerConfig;
use crate::error::{CallbackError, HandlerResult, ManagerError, ManagerResult};
use crate::factory_registry::{FactoryEvent, FactoryId, HandlerRegistry};
use crate::gate::{ConfigValidationGate, Validation};
use crate::handler::EntityHandler;

/// External services the manager depends on
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn EntityRegistry>,
    pub links: Arc<dyn LinkRegistry>,
    pub entity_types: Arc<dyn EntityTypeProvider>,
    pub channel_types: Arc<dyn ChannelTypeProvider>,
    pub config_descriptions: Arc<dyn ConfigDescriptionProvider>,
}

/// Lifecycle operations queued to an entity's worker
enum Op {
    Added,
    Updated { old: Entity, new: Entity },
    Removed,
    /// Re-run the lifecycle from the entity's current definition
    Evaluate,
    FactoryRemoved(FactoryId),
    ParentStatusChanged(StatusInfo),
    ChildInitialized { child: EntityId, generation: u64 },
    ChildDisposed {
        child_handler: Arc<dyn EntityHandler>,
        child_entity: Entity,
    },
    ChannelLinked(ChannelId),
    ChannelUnlinked(ChannelId),
    Shutdown(oneshot::Sender<()>),
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Added => "added",
            Op::Updated { .. } => "updated",
            Op::Removed => "removed",
            Op::Evaluate => "evaluate",
            Op::FactoryRemoved(_) => "factory_removed",
            Op::ParentStatusChanged(_) => "parent_status_changed",
            Op::ChildInitialized { .. } => "child_initialized",
            Op::ChildDisposed { .. } => "child_disposed",
            Op::ChannelLinked(_) => "channel_linked",
            Op::ChannelUnlinked(_) => "channel_unlinked",
            Op::Shutdown(_) => "shutdown",
        }
    }
}

/// A live handler bound to one entity
struct HandlerSlot {
    handler: Arc<dyn EntityHandler>,
    callback: Arc<EntityCallback>,
    factory: FactoryId,
    generation: u64,
    /// Snapshot of the definition the handler works with
    entity: RwLock<Entity>,
    /// Set once `initialize` has been invoked
    initialize_started: AtomicBool,
    /// Set once the parent was told about this handler
    announced: AtomicBool,
    /// ONLINE report recorded as BRIDGE_OFFLINE until the parent is ONLINE
    held_back: Mutex<Option<StatusInfo>>,
    /// Definition pushed by the handler itself, not to be echoed back
    last_pushed: Mutex<Option<Entity>>,
}

impl HandlerSlot {
    fn entity(&self) -> Entity {
        self.entity
            .read()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    fn set_entity(&self, entity: Entity) {
        *self.entity.write().unwrap_or_else(|e| e.into_inner()) = entity;
    }

    fn parent(&self) -> Option<EntityId> {
        self.entity().parent().cloned()
    }
}

/// Sending side of an entity's worker queue
struct WorkerHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Op>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Whether a handler report may change the current status
fn accepts_report(current: &StatusInfo) -> bool {
    match current.status {
        EntityStatus::Initializing => true,
        EntityStatus::Online | EntityStatus::Offline | EntityStatus::Unknown => true,
        EntityStatus::Uninitialized => current.detail == StatusDetail::HandlerTimeout,
        EntityStatus::Uninitializing => false,
    }
}

pub(crate) struct ManagerInner {
    this: Weak<ManagerInner>,
    config: ManagerConfig,
    pub(crate) registry: Arc<dyn EntityRegistry>,
    pub(crate) links: Arc<dyn LinkRegistry>,
    pub(crate) channel_types: Arc<dyn ChannelTypeProvider>,
    pub(crate) status: Arc<StatusStore>,
    factories: Arc<HandlerRegistry>,
    gate: ConfigValidationGate,
    caller: SafeCaller,
    slots: DashMap<EntityId, Arc<HandlerSlot>>,
    workers: DashMap<EntityId, WorkerHandle>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    /// Runtime captured by `start`, used when enqueueing from handler threads
    runtime: OnceLock<Handle>,
    observer: Mutex<Option<ObserverId>>,
    next_generation: AtomicU64,
    next_worker: AtomicU64,
    started: AtomicBool,
    shutting_down: AtomicBool,
}

/// Supervises the handler lifecycle of all entities
///
/// Cloning is cheap; all clones drive the same manager.
#[derive(Clone)]
pub struct EntityManager {
    inner: Arc<ManagerInner>,
}

impl EntityManager {
    pub fn new(
        config: ManagerConfig,
        collaborators: Collaborators,
        factories: Arc<HandlerRegistry>,
        status: Arc<StatusStore>,
    ) -> Self {
        let caller = SafeCaller::with_default_timeout(config.safe_call_timeout());
        let gate = ConfigValidationGate::new(
            collaborators.entity_types,
            collaborators.channel_types.clone(),
            collaborators.config_descriptions,
        );

        let inner = Arc::new_cyclic(|this| ManagerInner {
            this: this.clone(),
            config,
            registry: collaborators.registry,
            links: collaborators.links,
            channel_types: collaborators.channel_types,
            status,
            factories,
            gate,
            caller,
            slots: DashMap::new(),
            workers: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            runtime: OnceLock::new(),
            observer: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            next_worker: AtomicU64::new(1),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// Start listening and evaluate every entity already registered
    ///
    /// Must be called from within a tokio runtime. Calling it twice has no
    /// effect.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = inner.runtime.set(Handle::current());

        let observer = inner.status.add_observer(Arc::new(ParentWatcher {
            manager: inner.this.clone(),
        }));
        *lock(&inner.observer) = Some(observer);

        // Subscribe before the snapshot so nothing added in between is missed
        let registry_events = inner.registry.subscribe();
        let factory_events = inner.factories.subscribe();
        let link_events = inner.links.subscribe();

        let mut listeners = lock(&inner.listeners);
        listeners.push(tokio::spawn(listen_registry(
            inner.this.clone(),
            registry_events,
        )));
        listeners.push(tokio::spawn(listen_factories(
            inner.this.clone(),
            factory_events,
        )));
        listeners.push(tokio::spawn(listen_links(inner.this.clone(), link_events)));
        drop(listeners);

        let entities = inner.registry.all();
        info!(entities = entities.len(), "Starting entity manager");
        for entity in entities {
            inner.enqueue(entity.id(), Op::Added);
        }
    }

    /// Dispose every handler and stop all workers
    ///
    /// Waits at most the configured shutdown timeout for handlers to be
    /// disposed.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for listener in lock(&inner.listeners).drain(..) {
            listener.abort();
        }
        if let Some(observer) = lock(&inner.observer).take() {
            inner.status.remove_observer(observer);
        }

        let workers: Vec<_> = inner
            .workers
            .iter()
            .map(|r| (r.key().clone(), r.value().tx.clone()))
            .collect();
        info!(workers = workers.len(), "Shutting down entity manager");

        let replies: Vec<_> = workers
            .into_iter()
            .filter_map(|(entity_id, tx)| {
                let (reply_tx, reply_rx) = oneshot::channel();
                match tx.send(Op::Shutdown(reply_tx)) {
                    Ok(()) => Some(reply_rx),
                    Err(_) => {
                        debug!(entity_id = %entity_id, "Worker already stopped");
                        None
                    }
                }
            })
            .collect();

        let pending = replies.len();
        let timeout = inner.config.shutdown_timeout();
        if tokio::time::timeout(timeout, futures::future::join_all(replies))
            .await
            .is_err()
        {
            warn!(
                pending,
                timeout = ?timeout,
                "Shutdown timed out before every handler was disposed"
            );
        }

        inner.workers.clear();
        info!("Entity manager stopped");
    }

    /// Current status of an entity
    pub fn status(&self, entity_id: &EntityId) -> StatusInfo {
        self.inner.status.get(entity_id)
    }

    pub fn status_store(&self) -> &Arc<StatusStore> {
        &self.inner.status
    }

    pub fn factories(&self) -> &Arc<HandlerRegistry> {
        &self.inner.factories
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Handler currently bound to an entity
    pub fn handler(&self, entity_id: &EntityId) -> Option<Arc<dyn EntityHandler>> {
        self.inner
            .slots
            .get(entity_id)
            .map(|slot| slot.handler.clone())
    }

    /// Number of entities with a bound handler
    pub fn handler_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Number of entity workers currently accepting operations
    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    /// Route a command to the running handler of the channel's entity
    ///
    /// Commands bypass the lifecycle queue, so a handler may send commands
    /// to its own entity from within its lifecycle methods.
    #[instrument(skip_all, fields(channel = %channel))]
    pub async fn handle_command(&self, channel: &ChannelId, command: Command) -> ManagerResult<()> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ManagerError::ShutDown);
        }

        let entity_id = channel.entity_id();
        let entity = inner
            .registry
            .get(entity_id)
            .ok_or_else(|| ManagerError::EntityNotFound(entity_id.clone()))?;
        if entity.channel(channel).is_none() {
            return Err(ManagerError::ChannelNotFound(channel.clone()));
        }

        let status = inner.status.get(entity_id);
        let slot = inner.slot(entity_id).filter(|_| status.is_running()).ok_or_else(|| {
            ManagerError::NotInitialized {
                entity_id: entity_id.clone(),
                status: status.status,
            }
        })?;

        let handler = slot.handler.clone();
        let channel = channel.clone();
        inner
            .caller
            .call_default(&entity_id.to_string(), move || {
                handler.handle_command(&channel, &command)
            })
            .await??;
        Ok(())
    }
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("handlers", &self.inner.slots.len())
            .field("workers", &self.inner.workers.len())
            .finish()
    }
}

/// Propagates status changes to children and parents
struct ParentWatcher {
    manager: Weak<ManagerInner>,
}

impl StatusObserver for ParentWatcher {
    fn status_changed(&self, change: &StatusChange) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_status_change(change);
        }
    }
}

async fn listen_registry(
    manager: Weak<ManagerInner>,
    mut events: mpsc::UnboundedReceiver<RegistryEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let entity_id = event.entity_id().clone();
        let op = match event {
            RegistryEvent::Added(_) => Op::Added,
            RegistryEvent::Updated { old, new } => Op::Updated { old, new },
            RegistryEvent::Removed(_) => Op::Removed,
        };
        manager.enqueue(&entity_id, op);
    }
}

async fn listen_factories(
    manager: Weak<ManagerInner>,
    mut events: mpsc::UnboundedReceiver<FactoryEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        match event {
            FactoryEvent::Registered(_) => {
                for entity in manager.registry.all() {
                    if manager.slot(entity.id()).is_none() {
                        manager.enqueue(entity.id(), Op::Evaluate);
                    }
                }
            }
            FactoryEvent::Unregistered(factory) => {
                let affected: Vec<EntityId> = manager
                    .slots
                    .iter()
                    .filter(|slot| slot.factory == factory)
                    .map(|slot| slot.key().clone())
                    .collect();
                for entity_id in affected {
                    manager.enqueue(&entity_id, Op::FactoryRemoved(factory));
                }
            }
        }
    }
}

async fn listen_links(manager: Weak<ManagerInner>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let entity_id = event.channel().entity_id().clone();
        let op = match event {
            LinkEvent::Added { channel, .. } => Op::ChannelLinked(channel),
            LinkEvent::Removed { channel, .. } => Op::ChannelUnlinked(channel),
        };
        manager.enqueue(&entity_id, op);
    }
}

async fn run_worker(
    manager: Weak<ManagerInner>,
    entity_id: EntityId,
    worker: u64,
    mut ops: mpsc::UnboundedReceiver<Op>,
) {
    while let Some(op) = ops.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let stop = matches!(op, Op::Shutdown(_));
        trace!(entity_id = %entity_id, op = op.name(), "Processing lifecycle operation");

        if let Err(e) = manager.process(&entity_id, op).await {
            error!(
                entity_id = %entity_id,
                error = %e,
                "Lifecycle produced an invalid status transition, halting entity worker"
            );
            break;
        }
        if stop {
            break;
        }
        if manager.retire_worker(&entity_id, worker) {
            ops.close();
            let mut dropped = 0usize;
            while ops.try_recv().is_ok() {
                dropped += 1;
            }
            debug!(entity_id = %entity_id, dropped, "Entity gone, retiring worker");
            break;
        }
    }
    debug!(entity_id = %entity_id, "Entity worker stopped");
}

type LifecycleResult = Result<(), InvalidTransition>;

impl ManagerInner {
    fn slot(&self, entity_id: &EntityId) -> Option<Arc<HandlerSlot>> {
        self.slots.get(entity_id).map(|slot| slot.value().clone())
    }

    fn identity(entity_id: &EntityId) -> String {
        entity_id.to_string()
    }

    /// Queue an operation to an entity's worker, starting the worker if needed
    fn enqueue(&self, entity_id: &EntityId, op: Op) {
        if self.shutting_down.load(Ordering::SeqCst) {
            trace!(entity_id = %entity_id, op = op.name(), "Dropping operation during shutdown");
            return;
        }

        let (worker, tx) = {
            let entry = self.workers.entry(entity_id.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = self.next_worker.fetch_add(1, Ordering::SeqCst);
                let task = run_worker(self.this.clone(), entity_id.clone(), worker, rx);
                match self.runtime.get() {
                    Some(runtime) => drop(runtime.spawn(task)),
                    None => drop(tokio::spawn(task)),
                }
                debug!(entity_id = %entity_id, worker, "Started entity worker");
                WorkerHandle { id: worker, tx }
            });
            (entry.id, entry.tx.clone())
        };

        if let Err(mpsc::error::SendError(op)) = tx.send(op) {
            let replaced = self
                .workers
                .get(entity_id)
                .map(|current| current.id != worker)
                .unwrap_or(true);
            if replaced {
                // The worker retired after its entity was removed
                self.enqueue(entity_id, op);
            } else {
                warn!(entity_id = %entity_id, "Entity worker has halted, operation dropped");
            }
        }
    }

    /// Remove an entity's worker once the entity is gone and holds no handler
    ///
    /// Returns whether `worker` was removed; a later operation for the entity
    /// starts a fresh worker.
    fn retire_worker(&self, entity_id: &EntityId, worker: u64) -> bool {
        self.workers
            .remove_if(entity_id, |_, current| {
                current.id == worker
                    && !self.slots.contains_key(entity_id)
                    && self.registry.get(entity_id).is_none()
            })
            .is_some()
    }

    pub(crate) fn request_evaluation(&self, entity_id: &EntityId) {
        self.enqueue(entity_id, Op::Evaluate);
    }

    fn transition(
        &self,
        entity_id: &EntityId,
        to: StatusInfo,
    ) -> Result<Option<StatusChange>, InvalidTransition> {
        self.status
            .update(entity_id, |current| current.try_transition(to).map(Some))
    }

    async fn process(&self, entity_id: &EntityId, op: Op) -> LifecycleResult {
        match op {
            Op::Added | Op::Evaluate => self.evaluate(entity_id).await,
            Op::Updated { old, new } => self.entity_updated(entity_id, old, new).await,
            Op::Removed => self.entity_removed(entity_id).await,
            Op::FactoryRemoved(factory) => self.factory_removed(entity_id, factory).await,
            Op::ParentStatusChanged(parent_status) => {
                self.parent_status_changed(entity_id, parent_status).await
            }
            Op::ChildInitialized { child, generation } => {
                self.child_initialized(entity_id, child, generation).await;
                Ok(())
            }
            Op::ChildDisposed {
                child_handler,
                child_entity,
            } => {
                self.child_disposed(entity_id, child_handler, child_entity)
                    .await;
                Ok(())
            }
            Op::ChannelLinked(channel) => {
                self.notify_running(entity_id, "channel_linked", move |h| {
                    h.channel_linked(&channel)
                })
                .await;
                Ok(())
            }
            Op::ChannelUnlinked(channel) => {
                self.notify_running(entity_id, "channel_unlinked", move |h| {
                    h.channel_unlinked(&channel)
                })
                .await;
                Ok(())
            }
            Op::Shutdown(reply) => {
                let result = match self.slot(entity_id) {
                    Some(slot) => {
                        self.dispose_handler(entity_id, slot, StatusInfo::default())
                            .await
                    }
                    None => Ok(()),
                };
                let _ = reply.send(());
                result
            }
        }
    }

    /// Bring the entity's handler to the state its definition calls for
    #[instrument(skip_all, fields(entity_id = %entity_id))]
    async fn evaluate(&self, entity_id: &EntityId) -> LifecycleResult {
        let Some(entity) = self.registry.get(entity_id) else {
            trace!("Entity no longer registered");
            return Ok(());
        };

        let validation = self.gate.validate(&entity);
        if let Validation::Pending(_) = validation {
            let mut pending = StatusInfo::uninitialized(StatusDetail::HandlerConfigurationPending);
            if let Some(description) = validation.description() {
                pending = pending.with_description(description);
            }
            info!(status = %pending, "Configuration incomplete");
            return match self.slot(entity_id) {
                Some(slot) => self.dispose_handler(entity_id, slot, pending).await,
                None => self.transition(entity_id, pending).map(drop),
            };
        }

        let existing = match self.slot(entity_id) {
            Some(slot) if self.initialize_failed(entity_id, &slot) => {
                info!("Retrying failed initialization with a new handler");
                self.dispose_handler(entity_id, slot, StatusInfo::default())
                    .await?;
                None
            }
            existing => existing,
        };

        let slot = match existing {
            Some(slot) => slot,
            None => match self.create_handler(&entity).await? {
                Some(slot) => slot,
                None => return Ok(()),
            },
        };

        if slot.initialize_started.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(parent) = entity.parent() {
            let parent_status = self.status.get(parent);
            if !parent_status.is_running() {
                debug!(parent = %parent, parent_status = %parent_status, "Deferring initialization until parent runs");
                return self
                    .transition(
                        entity_id,
                        StatusInfo::uninitialized(StatusDetail::BridgeUninitialized),
                    )
                    .map(drop);
            }
        }

        self.initialize_handler(entity_id, slot).await
    }

    fn initialize_failed(&self, entity_id: &EntityId, slot: &HandlerSlot) -> bool {
        let status = self.status.get(entity_id);
        slot.initialize_started.load(Ordering::SeqCst)
            && status.status == EntityStatus::Uninitialized
            && status.detail == StatusDetail::HandlerInitializingError
    }

    /// Obtain a handler from the first supporting factory
    async fn create_handler(&self, entity: &Entity) -> Result<Option<Arc<HandlerSlot>>, InvalidTransition> {
        let entity_id = entity.id();
        let Some((factory_id, factory)) = self.factories.factory_for(entity.entity_type()) else {
            info!(entity_id = %entity_id, entity_type = %entity.entity_type(), "No handler factory supports entity type");
            self.transition(
                entity_id,
                StatusInfo::uninitialized(StatusDetail::HandlerMissingError),
            )?;
            return Ok(None);
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let callback = Arc::new(EntityCallback::new(
            entity_id.clone(),
            generation,
            self.this.clone(),
        ));

        let result = {
            let entity = entity.clone();
            let callback = callback.clone();
            self.caller
                .call(
                    &Self::identity(entity_id),
                    self.config.factory_timeout(),
                    move || factory.create_handler(&entity, callback),
                )
                .await
        };

        let handler = match result {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                callback.release();
                warn!(entity_id = %entity_id, factory = %factory_id, "Factory did not create a handler");
                self.transition(
                    entity_id,
                    StatusInfo::uninitialized(StatusDetail::HandlerRegisteringError)
                        .with_description("factory did not create a handler"),
                )?;
                return Ok(None);
            }
            Err(e) => {
                callback.release();
                warn!(entity_id = %entity_id, factory = %factory_id, error = %e, "Handler creation failed");
                self.transition(
                    entity_id,
                    StatusInfo::uninitialized(StatusDetail::HandlerRegisteringError)
                        .with_description(e.to_string()),
                )?;
                return Ok(None);
            }
        };

        let slot = Arc::new(HandlerSlot {
            handler,
            callback,
            factory: factory_id,
            generation,
            entity: RwLock::new(entity.clone()),
            initialize_started: AtomicBool::new(false),
            announced: AtomicBool::new(false),
            held_back: Mutex::new(None),
            last_pushed: Mutex::new(None),
        });
        self.slots.insert(entity_id.clone(), slot.clone());
        debug!(entity_id = %entity_id, factory = %factory_id, generation, "Handler created");
        Ok(Some(slot))
    }

    async fn initialize_handler(&self, entity_id: &EntityId, slot: Arc<HandlerSlot>) -> LifecycleResult {
        slot.initialize_started.store(true, Ordering::SeqCst);
        self.transition(entity_id, StatusInfo::initializing())?;

        let handler = slot.handler.clone();
        let result = self
            .caller
            .call_default(&Self::identity(entity_id), move || handler.initialize())
            .await;

        let failure = match result {
            Ok(Ok(())) => {
                if self.status.get(entity_id).status == EntityStatus::Initializing {
                    warn!(entity_id = %entity_id, "Handler initialized without reporting a status");
                }
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(SafeCallError::TimedOut { timeout, .. }) => {
                warn!(entity_id = %entity_id, timeout = ?timeout, "Handler initialization timed out");
                self.status.update(entity_id, |current| {
                    Ok::<_, InvalidTransition>(
                        (current.status == EntityStatus::Initializing).then(|| {
                            StatusInfo::uninitialized(StatusDetail::HandlerTimeout)
                                .with_description(format!("initialize exceeded {:?}", timeout))
                        }),
                    )
                })?;
                return Ok(());
            }
            Err(SafeCallError::Panicked { message, .. }) => message,
            Err(e) => e.to_string(),
        };

        warn!(entity_id = %entity_id, error = %failure, "Handler initialization failed");
        self.transition(
            entity_id,
            StatusInfo::uninitialized(StatusDetail::HandlerInitializingError).with_description(failure),
        )
        .map(drop)
    }

    /// Release the handler and settle at `final_status`
    #[instrument(skip_all, fields(entity_id = %entity_id, generation = slot.generation))]
    async fn dispose_handler(
        &self,
        entity_id: &EntityId,
        slot: Arc<HandlerSlot>,
        final_status: StatusInfo,
    ) -> LifecycleResult {
        self.status.update(entity_id, |current| {
            let active = current.status == EntityStatus::Initializing
                || current.is_running()
                || (current.status == EntityStatus::Uninitialized
                    && current.detail == StatusDetail::HandlerTimeout);
            if active {
                current.try_transition(StatusInfo::uninitializing()).map(Some)
            } else {
                Ok(None)
            }
        })?;

        self.slots
            .remove_if(entity_id, |_, current| current.generation == slot.generation);

        let handler = slot.handler.clone();
        match self
            .caller
            .call_default(&Self::identity(entity_id), move || handler.dispose())
            .await
        {
            Ok(Ok(())) => debug!("Handler disposed"),
            Ok(Err(e)) => warn!(error = %e, "Handler dispose failed"),
            Err(e) => warn!(error = %e, "Handler dispose did not complete"),
        }
        slot.callback.release();

        let entity = slot.entity();
        if let Some(parent) = entity.parent() {
            self.enqueue(
                parent,
                Op::ChildDisposed {
                    child_handler: slot.handler.clone(),
                    child_entity: entity.clone(),
                },
            );
        }

        self.transition(entity_id, final_status).map(drop)
    }

    #[instrument(skip_all, fields(entity_id = %entity_id))]
    async fn entity_updated(&self, entity_id: &EntityId, old: Entity, new: Entity) -> LifecycleResult {
        let Some(slot) = self.slot(entity_id) else {
            return self.evaluate(entity_id).await;
        };

        // Checked first: a handler may push its definition while initializing
        let pushed = lock(&slot.last_pushed).take();
        if pushed.as_ref() == Some(&new) {
            trace!("Skipping update pushed by the handler itself");
            let pending = matches!(self.gate.validate(&new), Validation::Pending(_));
            slot.set_entity(new);
            if pending {
                return self.evaluate(entity_id).await;
            }
            return Ok(());
        }

        if !self.status.get(entity_id).is_running() {
            debug!("Handler not running, re-creating it for the new definition");
            self.dispose_handler(entity_id, slot, StatusInfo::default())
                .await?;
            return self.evaluate(entity_id).await;
        }

        if let Validation::Pending(_) = self.gate.validate(&new) {
            return self.evaluate(entity_id).await;
        }

        slot.set_entity(new.clone());

        if old.parent() != new.parent() {
            debug!(old = ?old.parent(), new = ?new.parent(), "Parent changed");
            self.follow_parent(entity_id, &slot, new.parent())?;
        }

        let handler = slot.handler.clone();
        match self
            .caller
            .call_default(&Self::identity(entity_id), move || handler.entity_updated(&new))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Handler rejected entity update"),
            Err(e) => warn!(error = %e, "Handler entity update did not complete"),
        }
        Ok(())
    }

    #[instrument(skip_all, fields(entity_id = %entity_id))]
    async fn entity_removed(&self, entity_id: &EntityId) -> LifecycleResult {
        match self.slot(entity_id) {
            Some(slot) => {
                info!("Entity removed, disposing handler");
                self.dispose_handler(entity_id, slot, StatusInfo::default())
                    .await
            }
            None => self.transition(entity_id, StatusInfo::default()).map(drop),
        }
    }

    async fn factory_removed(&self, entity_id: &EntityId, factory: FactoryId) -> LifecycleResult {
        let Some(slot) = self.slot(entity_id).filter(|slot| slot.factory == factory) else {
            return Ok(());
        };
        info!(entity_id = %entity_id, factory = %factory, "Handler factory removed, disposing handler");
        self.dispose_handler(
            entity_id,
            slot,
            StatusInfo::uninitialized(StatusDetail::HandlerMissingError),
        )
        .await?;
        self.evaluate(entity_id).await
    }

    #[instrument(skip_all, fields(entity_id = %entity_id, parent_status = %parent_status))]
    async fn parent_status_changed(&self, entity_id: &EntityId, parent_status: StatusInfo) -> LifecycleResult {
        let slot = self.slot(entity_id);
        let own_status = self.status.get(entity_id);

        if let Some(ref slot) = slot {
            if own_status.is_running() {
                let handler = slot.handler.clone();
                let reported = parent_status.clone();
                if let Err(e) = self
                    .caller
                    .call_default(&Self::identity(entity_id), move || {
                        handler.bridge_status_changed(&reported)
                    })
                    .await
                    .map_err(ManagerError::from)
                    .and_then(|r| r.map_err(ManagerError::from))
                {
                    warn!(error = %e, "Handler failed to process bridge status change");
                }
            }
        }

        // Use the parent's current status; it may have moved on since
        let Some(parent) = self.registry.get(entity_id).and_then(|e| e.parent().cloned()) else {
            return Ok(());
        };
        let parent_now = self.status.get(&parent);

        if let Some(ref slot) = slot {
            self.follow_parent(entity_id, slot, Some(&parent))?;
        }

        let deferred = match slot {
            Some(ref slot) => !slot.initialize_started.load(Ordering::SeqCst),
            None => own_status.detail == StatusDetail::BridgeUninitialized,
        };
        if deferred && parent_now.is_running() {
            debug!("Parent running, resuming deferred initialization");
            return self.evaluate(entity_id).await;
        }
        Ok(())
    }

    /// Keep an ONLINE child in step with its parent
    ///
    /// While the parent is not ONLINE the child is shown as
    /// OFFLINE/BRIDGE_OFFLINE and its ONLINE report is held back. Once the
    /// parent is ONLINE, or the child has no parent, the held back report
    /// is replayed.
    fn follow_parent(
        &self,
        entity_id: &EntityId,
        slot: &HandlerSlot,
        parent: Option<&EntityId>,
    ) -> LifecycleResult {
        let parent_online = parent
            .map(|parent| self.status.get(parent).status == EntityStatus::Online)
            .unwrap_or(true);

        if parent_online {
            let held = lock(&slot.held_back).take();
            if let Some(held) = held {
                debug!("Parent online, replaying held back status");
                if let Err(e) = self.apply_report(&slot.callback, held) {
                    warn!(error = %e, "Held back status could not be applied");
                }
            }
            return Ok(());
        }

        let demoted = self.status.update(entity_id, |current| {
            Ok::<_, InvalidTransition>((current.status == EntityStatus::Online).then(|| {
                StatusInfo::offline(StatusDetail::BridgeOffline)
            }))
        })?;
        if let Some(change) = demoted {
            *lock(&slot.held_back) = Some(change.old);
        }
        Ok(())
    }

    async fn child_initialized(&self, entity_id: &EntityId, child: EntityId, generation: u64) {
        let Some(child_slot) = self
            .slot(&child)
            .filter(|slot| slot.generation == generation)
        else {
            return;
        };
        let child_handler = child_slot.handler.clone();
        let child_entity = child_slot.entity();
        self.notify_handler(entity_id, "child_handler_initialized", move |h| {
            h.child_handler_initialized(child_handler, &child_entity)
        })
        .await;
    }

    async fn child_disposed(
        &self,
        entity_id: &EntityId,
        child_handler: Arc<dyn EntityHandler>,
        child_entity: Entity,
    ) {
        self.notify_handler(entity_id, "child_handler_disposed", move |h| {
            h.child_handler_disposed(child_handler, &child_entity)
        })
        .await;
    }

    /// Invoke a notification on the entity's handler if it is running
    async fn notify_running<F>(&self, entity_id: &EntityId, what: &'static str, f: F)
    where
        F: FnOnce(&dyn EntityHandler) -> HandlerResult + Send + 'static,
    {
        if self.status.get(entity_id).is_running() {
            self.notify_handler(entity_id, what, f).await;
        }
    }

    /// Invoke a notification on the entity's handler, if any
    async fn notify_handler<F>(&self, entity_id: &EntityId, what: &'static str, f: F)
    where
        F: FnOnce(&dyn EntityHandler) -> HandlerResult + Send + 'static,
    {
        let Some(slot) = self.slot(entity_id) else {
            return;
        };
        let handler = slot.handler.clone();
        match self
            .caller
            .call_default(&Self::identity(entity_id), move || f(handler.as_ref()))
            .await
        {
            Ok(Ok(())) => trace!(entity_id = %entity_id, notification = what, "Handler notified"),
            Ok(Err(e)) => {
                warn!(entity_id = %entity_id, notification = what, error = %e, "Handler notification failed")
            }
            Err(e) => {
                warn!(entity_id = %entity_id, notification = what, error = %e, "Handler notification did not complete")
            }
        }
    }

    /// Apply a status reported by a handler through its callback
    pub(crate) fn apply_report(
        &self,
        callback: &EntityCallback,
        info: StatusInfo,
    ) -> Result<(), CallbackError> {
        let entity_id = callback.entity_id();
        let Some(slot) = self
            .slot(entity_id)
            .filter(|slot| slot.generation == callback.generation())
        else {
            debug!(entity_id = %entity_id, status = %info, "Ignoring report from stale handler");
            return Ok(());
        };

        // A child cannot be ONLINE while its parent is not
        let parent = slot.parent();
        let gated = info.status == EntityStatus::Online
            && parent
                .as_ref()
                .map(|parent| self.status.get(parent).status != EntityStatus::Online)
                .unwrap_or(false);
        let effective = if gated {
            StatusInfo::offline(StatusDetail::BridgeOffline)
        } else {
            info.clone()
        };
        *lock(&slot.held_back) = gated.then(|| info.clone());

        let change = self.status.update(entity_id, |current| {
            if !callback.is_live() || !accepts_report(current) {
                return Ok(None);
            }
            current.try_transition(effective).map(Some)
        })?;

        match change {
            Some(change) => trace!(entity_id = %entity_id, status = %change.new, "Handler report applied"),
            None => trace!(entity_id = %entity_id, status = %info, "Handler report had no effect"),
        }

        if gated {
            // The parent may have come online while the report was being gated
            if let Some(parent) = parent {
                let parent_status = self.status.get(&parent);
                if parent_status.status == EntityStatus::Online {
                    self.enqueue(entity_id, Op::ParentStatusChanged(parent_status));
                }
            }
        }
        Ok(())
    }

    /// Persist a definition pushed by the handler itself
    pub(crate) fn push_entity_update(
        &self,
        callback: &EntityCallback,
        entity: Entity,
    ) -> Result<(), CallbackError> {
        if let Some(slot) = self
            .slot(callback.entity_id())
            .filter(|slot| slot.generation == callback.generation())
        {
            *lock(&slot.last_pushed) = Some(entity.clone());
        }
        self.registry.update(entity)?;
        Ok(())
    }

    pub(crate) fn validate_entity_parameters(
        &self,
        entity_id: &EntityId,
        configuration: &Configuration,
    ) -> Result<(), CallbackError> {
        let Some(uri) = self
            .registry
            .get(entity_id)
            .and_then(|entity| self.gate.entity_description_uri(entity.entity_type()))
        else {
            return Ok(());
        };
        self.gate.validate_parameters(&uri, configuration)?;
        Ok(())
    }

    fn on_status_change(&self, change: &StatusChange) {
        for child in self.registry.children_of(&change.entity_id) {
            self.enqueue(child.id(), Op::ParentStatusChanged(change.new.clone()));
        }

        if change.new.is_running() {
            if let Some(slot) = self.slot(&change.entity_id) {
                if !slot.announced.swap(true, Ordering::SeqCst) {
                    if let Some(parent) = slot.parent() {
                        self.enqueue(
                            &parent,
                            Op::ChildInitialized {
                                child: change.entity_id.clone(),
                                generation: slot.generation,
                            },
                        );
                    }
                }
            }
        }
    }
}

/// Poll interval used by [`EntityManager::wait_for_status`]
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl EntityManager {
    /// Wait until an entity's status satisfies `predicate`
    ///
    /// Returns the matching status, or `None` if `timeout` elapsed first.
    pub async fn wait_for_status<F>(
        &self,
        entity_id: &EntityId,
        timeout: Duration,
        predicate: F,
    ) -> Option<StatusInfo>
    where
        F: Fn(&StatusInfo) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.status(entity_id);
            if predicate(&status) {
                return Some(status);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sh_core::EntityTypeId;
    use sh_registries::{ManagedEntityRegistry, ManagedLinkRegistry, TypeCatalog};

    fn manager() -> EntityManager {
        let catalog = Arc::new(TypeCatalog::new());
        EntityManager::new(
            ManagerConfig::default(),
            Collaborators {
                registry: Arc::new(ManagedEntityRegistry::new()),
                links: Arc::new(ManagedLinkRegistry::new()),
                entity_types: catalog.clone(),
                channel_types: catalog.clone(),
                config_descriptions: catalog,
            },
            Arc::new(HandlerRegistry::new()),
            Arc::new(StatusStore::new()),
        )
    }

    #[test]
    fn test_reports_accepted_only_while_handler_active() {
        assert!(accepts_report(&StatusInfo::initializing()));
        assert!(accepts_report(&StatusInfo::online()));
        assert!(accepts_report(&StatusInfo::offline(StatusDetail::CommunicationError)));
        assert!(accepts_report(&StatusInfo::unknown()));
        assert!(accepts_report(&StatusInfo::uninitialized(StatusDetail::HandlerTimeout)));

        assert!(!accepts_report(&StatusInfo::default()));
        assert!(!accepts_report(&StatusInfo::uninitializing()));
        assert!(!accepts_report(&StatusInfo::uninitialized(
            StatusDetail::HandlerInitializingError
        )));
    }

    #[test]
    fn test_command_for_unknown_entity() {
        let manager = manager();
        let entity_type = EntityTypeId::new("test", "lamp").unwrap();
        let entity = EntityId::new(&entity_type, "ghost").unwrap();
        let channel = ChannelId::new(&entity, "power").unwrap();

        let result = tokio_test::block_on(manager.handle_command(&channel, Command::On));
        assert!(matches!(result, Err(ManagerError::EntityNotFound(id)) if id == entity));
        assert_eq!(manager.status(&entity), StatusInfo::default());
        assert_eq!(manager.handler_count(), 0);
    }

    #[test]
    fn test_wait_for_status_times_out() {
        let manager = manager();
        let entity_type = EntityTypeId::new("test", "lamp").unwrap();
        let entity = EntityId::new(&entity_type, "one").unwrap();

        let status = tokio_test::block_on(manager.wait_for_status(
            &entity,
            Duration::from_millis(50),
            |s| s.is_running(),
        ));
        assert!(status.is_none());
    }
}
