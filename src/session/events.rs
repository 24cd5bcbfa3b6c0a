//! Session event subscriptions
//!
//! Subscribers get their own unbounded channel, so publishing never blocks
//! on a slow consumer. Dropping the [`Subscription`] unsubscribes.

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::lock::types::Lock;
use crate::vessel::VesselId;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    LockAcquired(Lock),
    LockReleased(Lock),
    VesselRemoved(VesselId),
    SpectateStarted { vessel: VesselId },
    SpectateStopped,
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, Sender<SyncEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = unbounded();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);
        Subscription {
            id,
            bus: Arc::downgrade(self),
            receiver: rx,
        }
    }

    pub fn publish(&self, event: SyncEvent) {
        let mut subscribers = self.subscribers.lock();
        // A failed send means the receiver is gone
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }
}

/// Live subscription; events published after creation queue up here
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
    receiver: Receiver<SyncEvent>,
}

impl Subscription {
    pub fn try_recv(&self) -> Option<SyncEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything pending right now
    pub fn drain(&self) -> Vec<SyncEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn receiver(&self) -> &Receiver<SyncEvent> {
        &self.receiver
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
