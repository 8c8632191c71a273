//! Event fan-out to subscription queues.
//!
//! Every inbound event/push frame is copied to each registered queue.
//! Queues are bounded and never block the frame reader: when a queue is
//! full the newest frame is dropped and counted, so one stuck consumer
//! cannot stall the connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use gantry_core::Frame;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one subscription in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Slot {
    tx: mpsc::Sender<Frame>,
    dropped: u64,
}

/// Registry of bounded fan-out queues.
pub struct SubscriptionRegistry {
    slots: Mutex<HashMap<SubscriptionId, Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Receiving half of one subscription.
///
/// The stream ends (`recv` returns `None`) when the subscription is
/// removed from the registry, by `unsubscribe` or by the client's
/// `close()` clearing the registry. No synthetic closure frame is
/// delivered; a consumer that needs to distinguish shutdown from quiet
/// should watch the client lifecycle.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Frame>,
}

impl Subscription {
    /// This subscription's registry handle.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next queued frame, in reader arrival order.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }
}

impl SubscriptionRegistry {
    /// Create a registry whose queues hold `capacity` frames each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Register a new bounded queue.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::channel(self.capacity);
        let _ = self.slots.lock().insert(id, Slot { tx, dropped: 0 });
        debug!(subscription = %id, "subscription registered");
        Subscription { id, rx }
    }

    /// Remove a subscription. A no-op when the handle was already removed
    /// or never existed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.slots.lock().remove(&id).is_some() {
            debug!(subscription = %id, "subscription removed");
        }
    }

    /// Copy a frame to every live queue, dropping the newest frame on
    /// overflow. Never awaits queue space. Slots whose receiver is gone
    /// are pruned.
    pub fn fan_out(&self, frame: &Frame) {
        let mut slots = self.slots.lock();
        let mut dead = Vec::new();
        for (id, slot) in slots.iter_mut() {
            match slot.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped += 1;
                    debug!(
                        subscription = %id,
                        total_drops = slot.dropped,
                        "subscription queue full, dropping frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
            }
        }
        for id in dead {
            let _ = slots.remove(&id);
            debug!(subscription = %id, "pruning subscription with dropped receiver");
        }
    }

    /// Remove all subscriptions; each consumer's stream ends.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of live subscriptions.
    pub fn count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Frames dropped so far for one subscription.
    pub fn dropped(&self, id: SubscriptionId) -> Option<u64> {
        self.slots.lock().get(&id).map(|slot| slot.dropped)
    }
}
