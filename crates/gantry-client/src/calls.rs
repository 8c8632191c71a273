//! Pending-call table for request/response correlation.
//!
//! Each in-flight call is one single-assignment rendezvous: the caller
//! holds the `oneshot` receiver, the frame reader resolves the sender.
//! Entries are removed exactly once: on resolution, timeout, or
//! connection loss.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to a waiting caller: success payload or the
/// server-supplied error payload.
pub(crate) type CallReply = Result<Value, Value>;

/// Table of outstanding calls, keyed by correlation ID.
#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<CallReply>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and hand back the receiving half.
    ///
    /// Correlation IDs are never reused within a connection, so at most
    /// one entry exists per ID.
    pub fn register(&self, id: &str) -> oneshot::Receiver<CallReply> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().insert(id.to_owned(), tx);
        debug_assert!(previous.is_none(), "correlation ID reused: {id}");
        rx
    }

    /// Resolve and remove the entry for `id`.
    ///
    /// Returns `false` when the ID is unknown (stale or duplicate
    /// response). A send failure means the caller already gave up
    /// (timeout race) and is ignored.
    pub fn resolve(&self, id: &str, reply: CallReply) -> bool {
        match self.inner.lock().remove(id) {
            Some(tx) => {
                let _ = tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without resolving it (timeout or send failure).
    /// Safe when the entry is already gone.
    pub fn remove(&self, id: &str) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    /// Reject every outstanding call by dropping its sender; each waiting
    /// caller observes channel closure.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "cancelling outstanding calls");
        }
    }

    /// Whether an entry exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
