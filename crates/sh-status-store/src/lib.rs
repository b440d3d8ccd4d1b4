//! Entity status storage with change notification
//!
//! This crate provides the StatusStore, the single authority for the current
//! status of every entity. Writes that change a record are fanned out to the
//! registered observers and to broadcast subscribers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sh_core::{EntityId, StatusInfo};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// Default channel capacity for broadcast subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A status change of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub entity_id: EntityId,
    pub old: StatusInfo,
    pub new: StatusInfo,
    pub changed_at: DateTime<Utc>,
}

impl StatusChange {
    fn new(entity_id: EntityId, old: StatusInfo, new: StatusInfo) -> Self {
        Self {
            entity_id,
            old,
            new,
            changed_at: Utc::now(),
        }
    }
}

/// Receives status changes synchronously on the writing thread
pub trait StatusObserver: Send + Sync {
    fn status_changed(&self, change: &StatusChange);
}

impl<F> StatusObserver for F
where
    F: Fn(&StatusChange) + Send + Sync,
{
    fn status_changed(&self, change: &StatusChange) {
        self(change)
    }
}

/// A unique identifier for a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// The status store tracks the status of all entities
///
/// The StatusStore is responsible for:
/// - Storing the current status record of every entity
/// - Answering `UNINITIALIZED/NONE` for entities it has never seen
/// - Notifying observers of every effective change, in registration order
/// - Atomic check-and-set updates for validated transitions
///
/// Notifications for one entity written from different threads are not
/// ordered with respect to each other.
pub struct StatusStore {
    /// Status records keyed by entity id
    statuses: DashMap<EntityId, StatusInfo>,
    /// Observers in registration order
    observers: RwLock<Vec<(ObserverId, Arc<dyn StatusObserver>)>>,
    /// Sender for async subscribers
    sender: broadcast::Sender<StatusChange>,
    next_observer_id: AtomicU64,
}

impl StatusStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            statuses: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            sender,
            next_observer_id: AtomicU64::new(1),
        }
    }

    /// Get the current status of an entity
    pub fn get(&self, entity_id: &EntityId) -> StatusInfo {
        self.statuses
            .get(entity_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Set the status of an entity
    ///
    /// Returns `false` without notifying when the record is unchanged.
    #[instrument(skip(self, info), fields(entity_id = %entity_id, status = %info))]
    pub fn set(&self, entity_id: &EntityId, info: StatusInfo) -> bool {
        let result: Result<_, std::convert::Infallible> =
            self.update(entity_id, |_| Ok(Some(info)));
        matches!(result, Ok(Some(_)))
    }

    /// Atomically compute a new status from the current one
    ///
    /// `f` runs under the entry lock and returns the new record, `None` to
    /// leave the record alone, or an error which is passed through. Observers
    /// are notified after the lock is released.
    pub fn update<F, E>(&self, entity_id: &EntityId, f: F) -> Result<Option<StatusChange>, E>
    where
        F: FnOnce(&StatusInfo) -> Result<Option<StatusInfo>, E>,
    {
        let change = {
            let mut entry = self.statuses.entry(entity_id.clone()).or_default();
            let old = entry.value().clone();
            match f(&old)? {
                Some(new) if new != old => {
                    *entry.value_mut() = new.clone();
                    Some(StatusChange::new(entity_id.clone(), old, new))
                }
                _ => None,
            }
        };

        if let Some(ref change) = change {
            debug!(
                entity_id = %change.entity_id,
                old = %change.old,
                new = %change.new,
                "Status changed"
            );
            self.notify(change);
        }

        Ok(change)
    }

    /// Forget an entity's record
    ///
    /// No notification is sent; a later `get` answers `UNINITIALIZED/NONE`.
    pub fn remove(&self, entity_id: &EntityId) -> Option<StatusInfo> {
        self.statuses.remove(entity_id).map(|(_, s)| s)
    }

    /// Register an observer
    pub fn add_observer(&self, observer: Arc<dyn StatusObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::SeqCst));
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        id
    }

    /// Unregister an observer
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Subscribe to status changes asynchronously
    ///
    /// A receiver that falls more than the channel capacity behind loses the
    /// oldest changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.sender.subscribe()
    }

    /// Get all entity ids with a record
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.statuses.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    fn notify(&self, change: &StatusChange) {
        let observers: Vec<_> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer.status_changed(change)))
            {
                warn!(
                    entity_id = %change.entity_id,
                    error = %panic_message(payload.as_ref()),
                    "Status observer panicked"
                );
            }
        }

        // Ignore send errors - they just mean no active receivers
        let _ = self.sender.send(change.clone());
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Thread-safe wrapper for StatusStore
pub type SharedStatusStore = Arc<StatusStore>;
