//! Priority queue of retryable actions replayed when connectivity returns

use crate::error::AuthResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Execution priority, lowest runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Zero-argument idempotent operation
pub type DeferredAction = Arc<dyn Fn() -> BoxFuture<'static, AuthResult<()>> + Send + Sync>;

struct Entry {
    id: String,
    action: DeferredAction,
    priority: Priority,
    enqueued_at: Instant,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Deferred request queue
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: Mutex<Vec<Entry>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, id: impl Into<String>, action: DeferredAction, priority: Priority) {
        let id = id.into();
        debug!(%id, ?priority, "Deferring action");
        self.entries.lock().push(Entry {
            id,
            action,
            priority,
            enqueued_at: Instant::now(),
        });
    }

    /// Enqueue unless an entry with the same id is already waiting
    ///
    /// Returns whether the action was added.
    pub fn enqueue_unique(
        &self,
        id: impl Into<String>,
        action: DeferredAction,
        priority: Priority,
    ) -> bool {
        let id = id.into();
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.id == id) {
            debug!(%id, "Action already deferred");
            return false;
        }
        debug!(%id, ?priority, "Deferring action");
        entries.push(Entry {
            id,
            action,
            priority,
            enqueued_at: Instant::now(),
        });
        true
    }

    /// Run every queued action once, LOW through CRITICAL
    ///
    /// The queue is emptied before anything runs; actions enqueued while
    /// draining wait for the next call. Returns the number that succeeded.
    pub async fn process_all(&self) -> usize {
        let mut batch = std::mem::take(&mut *self.entries.lock());
        if batch.is_empty() {
            return 0;
        }
        // Stable: equal priorities keep insertion order
        batch.sort_by_key(|e| e.priority);

        let total = batch.len();
        let mut succeeded = 0;
        for entry in batch {
            let action = entry.action.clone();
            // The batch is already off the queue; a panic must not lose the rest
            match AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => warn!(id = %entry.id, error = %e, "Deferred action failed"),
                Err(_) => error!(id = %entry.id, "Deferred action panicked"),
            }
        }
        debug!(succeeded, total, "Processed deferred actions");
        succeeded
    }

    /// Drop entries older than `max_age` without running them
    pub fn remove_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| now.duration_since(e.enqueued_at) <= max_age);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Evicted expired deferred actions");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
