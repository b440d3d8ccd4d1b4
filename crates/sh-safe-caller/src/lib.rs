//! Timeout- and reentrancy-aware execution of handler code
//!
//! Handler code is arbitrary blocking code: it may sleep, fail, panic, or
//! call back into the manager. The SafeCaller runs it on tokio's blocking
//! pool and gives the caller a bounded wait:
//!
//! - Calls sharing an identity run one at a time, in the order the calls
//!   were first polled. Different identities run in parallel.
//! - A timed-out call is not cancelled. Its body still runs to completion,
//!   and later calls for the same identity wait for it.
//! - A call for identity X made from the thread that is currently executing
//!   a body for X runs inline instead of queueing behind itself.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn, Instrument};
use ulid::Ulid;

/// Time bound applied by [`SafeCaller::call_default`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from a guarded call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SafeCallError {
    #[error("call for '{identity}' timed out after {timeout:?}")]
    TimedOut { identity: String, timeout: Duration },

    #[error("call for '{identity}' panicked: {message}")]
    Panicked { identity: String, message: String },

    #[error("call for '{identity}' was aborted before completing")]
    Aborted { identity: String },
}

thread_local! {
    /// Identities whose bodies are executing on this thread, innermost last
    static ACTIVE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as executing a body for an identity
struct ActiveScope;

impl ActiveScope {
    fn enter(identity: &str) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(identity.to_string()));
        ActiveScope
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

/// Per-identity queue state
struct IdentityQueue {
    /// Completion signal of the most recently queued call
    tail: Option<oneshot::Receiver<()>>,
    /// Calls queued or running
    pending: usize,
}

/// Runs handler code with a time bound and per-identity serialization
#[derive(Clone)]
pub struct SafeCaller {
    identities: Arc<DashMap<String, IdentityQueue>>,
    default_timeout: Duration,
}

impl SafeCaller {
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            identities: Arc::new(DashMap::new()),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Check if the current thread is executing a body for `identity`
    pub fn is_inside(identity: &str) -> bool {
        ACTIVE.with(|active| active.borrow().iter().any(|id| id == identity))
    }

    /// Run `body` with the default timeout
    pub async fn call_default<T, F>(&self, identity: &str, body: F) -> Result<T, SafeCallError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.call(identity, self.default_timeout, body).await
    }

    /// Run `body` on the blocking pool, waiting at most `timeout`
    ///
    /// The timeout covers waiting behind earlier calls for the same identity
    /// plus execution.
    pub async fn call<T, F>(
        &self,
        identity: &str,
        timeout: Duration,
        body: F,
    ) -> Result<T, SafeCallError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if Self::is_inside(identity) {
            trace!(identity, "Nested call runs inline");
            return catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
                SafeCallError::Panicked {
                    identity: identity.to_string(),
                    message: panic_message(payload.as_ref()),
                }
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.enqueue(identity, done_rx);

        let span = tracing::debug_span!("safe_call", identity, invocation = %Ulid::new());
        let identities = self.identities.clone();
        let owned_identity = identity.to_string();

        let task = tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    // Err just means the previous call's task is gone
                    let _ = previous.await;
                }

                let scope_identity = owned_identity.clone();
                let span = tracing::Span::current();
                let result = tokio::task::spawn_blocking(move || {
                    let _enter = span.enter();
                    let _scope = ActiveScope::enter(&scope_identity);
                    catch_unwind(AssertUnwindSafe(body))
                })
                .await;

                drop(done_tx);
                release(&identities, &owned_identity);
                result
            }
            .instrument(span),
        );

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(Ok(value)))) => Ok(value),
            Ok(Ok(Ok(Err(payload)))) => {
                let message = panic_message(payload.as_ref());
                warn!(identity, error = %message, "Handler code panicked");
                Err(SafeCallError::Panicked {
                    identity: identity.to_string(),
                    message,
                })
            }
            Ok(Ok(Err(e))) | Ok(Err(e)) => {
                debug!(identity, error = %e, "Guarded call aborted");
                Err(SafeCallError::Aborted {
                    identity: identity.to_string(),
                })
            }
            Err(_) => {
                warn!(identity, timeout = ?timeout, "Handler code exceeded its time bound");
                Err(SafeCallError::TimedOut {
                    identity: identity.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Number of identities with queued or running calls
    pub fn pending_identities(&self) -> usize {
        self.identities.len()
    }

    /// Number of queued or running calls for one identity
    pub fn pending(&self, identity: &str) -> usize {
        self.identities
            .get(identity)
            .map(|queue| queue.pending)
            .unwrap_or(0)
    }

    /// Append a call to the identity's queue, returning the signal to wait for
    fn enqueue(&self, identity: &str, done: oneshot::Receiver<()>) -> Option<oneshot::Receiver<()>> {
        let mut queue = self
            .identities
            .entry(identity.to_string())
            .or_insert_with(|| IdentityQueue {
                tail: None,
                pending: 0,
            });
        queue.pending += 1;
        queue.tail.replace(done)
    }
}

impl Default for SafeCaller {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SafeCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeCaller")
            .field("default_timeout", &self.default_timeout)
            .field("pending_identities", &self.identities.len())
            .finish()
    }
}

/// Drop the identity's bookkeeping once nothing is queued for it
fn release(identities: &DashMap<String, IdentityQueue>, identity: &str) {
    if let Entry::Occupied(mut entry) = identities.entry(identity.to_string()) {
        entry.get_mut().pending -= 1;
        if entry.get().pending == 0 {
            entry.remove();
        }
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
