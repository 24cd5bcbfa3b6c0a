//! Network-side handle of a sync session
//!
//! Applies server messages to the shared registry and snapshot buffer. Every
//! path is a short critical section, the simulation tick is never waited on.

use hashbrown::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::lock::registry::LockRegistry;
use crate::lock::types::{Lock, LockKey, PlayerId};
use crate::metrics::SyncMetrics;
use crate::net::protocol::{decode, DecodeError, ServerMessage};
use crate::position::buffer::{EnqueueOutcome, PositionSnapshotBuffer};
use crate::position::snapshot::PositionSnapshot;
use crate::session::events::{EventBus, SyncEvent};
use crate::util::unix_millis;

#[derive(Debug, Clone)]
pub struct SessionInbox {
    pub(crate) player: PlayerId,
    pub(crate) registry: Arc<LockRegistry>,
    pub(crate) buffer: Arc<PositionSnapshotBuffer>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) metrics: Arc<SyncMetrics>,
}

impl SessionInbox {
    /// Decode and apply one frame from the transport
    pub fn handle_frame(&self, frame: &[u8]) -> Result<(), DecodeError> {
        let message: ServerMessage = decode(frame)?;
        self.handle(message);
        Ok(())
    }

    pub fn handle(&self, message: ServerMessage) {
        match message {
            ServerMessage::LockAcquired { lock, force } => {
                // The arbiter already decided; mirror it, replacing any stale owner
                let _ = self.registry.acquire(lock.key.clone(), lock.owner, true);
                debug!("Lock {} granted (force={})", lock, force);
                self.events.publish(SyncEvent::LockAcquired(lock));
            }
            ServerMessage::LockDenied { lock, owner } => {
                SyncMetrics::incr(&self.metrics.lock_denials);
                debug!("Lock {} denied, held by {}", lock.key, owner);
                let _ = self.registry.acquire(lock.key, owner, true);
            }
            ServerMessage::LockReleased { lock } => {
                if self.registry.release(&lock.key, lock.owner) {
                    debug!("Lock {} released", lock);
                    self.events.publish(SyncEvent::LockReleased(lock));
                }
            }
            ServerMessage::LockList { locks } => {
                debug!("Lock table refreshed ({} entries)", locks.len());
                self.apply_lock_list(locks);
            }
            ServerMessage::Position(snapshot) => self.handle_position(snapshot),
        }
    }

    /// Swap in the full table and announce whatever changed, so reactions
    /// to grants and releases also run for entries we only learn about here
    fn apply_lock_list(&self, locks: Vec<Lock>) {
        let previous: HashMap<LockKey, PlayerId> = self
            .registry
            .replace_all(locks.iter().cloned())
            .into_iter()
            .map(|lock| (lock.key, lock.owner))
            .collect();
        let current: HashSet<&LockKey> = locks.iter().map(|lock| &lock.key).collect();

        for (key, owner) in &previous {
            if !current.contains(key) {
                self.events
                    .publish(SyncEvent::LockReleased(Lock::new(key.clone(), *owner)));
            }
        }
        drop(current);
        for lock in locks {
            if previous.get(&lock.key) != Some(&lock.owner) {
                self.events.publish(SyncEvent::LockAcquired(lock));
            }
        }
    }

    fn handle_position(&self, snapshot: PositionSnapshot) {
        let vessel = snapshot.vessel_id;
        // Our own simulation is authoritative for what we update
        if self.registry.owned_by(&LockKey::Update(vessel), self.player)
            || self.registry.owned_by(&LockKey::UnloadedUpdate(vessel), self.player)
        {
            return;
        }

        match self.buffer.enqueue(snapshot.received(unix_millis())) {
            Ok(EnqueueOutcome::Queued) => SyncMetrics::incr(&self.metrics.snapshots_accepted),
            Ok(EnqueueOutcome::QueuedEvicting { evicted }) => {
                SyncMetrics::incr(&self.metrics.snapshots_accepted);
                SyncMetrics::incr(&self.metrics.snapshots_evicted);
                debug!("Snapshot queue for {} full, evicted {}", vessel, evicted);
            }
            Err(e) => {
                SyncMetrics::incr(&self.metrics.snapshots_rejected);
                debug!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::encode;
    use crate::orbit::OrbitalElements;
    use crate::vessel::Vessel;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn inbox(player: PlayerId) -> SessionInbox {
        SessionInbox {
            player,
            registry: Arc::new(LockRegistry::new()),
            buffer: Arc::new(PositionSnapshotBuffer::default()),
            events: EventBus::new(),
            metrics: Arc::new(SyncMetrics::new()),
        }
    }

    #[test]
    fn test_grant_updates_registry_and_publishes() {
        let me = Uuid::new_v4();
        let inbox = inbox(me);
        let sub = inbox.events.subscribe();
        let lock = Lock::new(LockKey::Control(Uuid::new_v4()), me);

        let frame = encode(&ServerMessage::LockAcquired {
            lock: lock.clone(),
            force: false,
        })
        .unwrap();
        inbox.handle_frame(&frame).unwrap();

        assert!(inbox.registry.owned_by(&lock.key, me));
        assert_eq!(sub.drain(), vec![SyncEvent::LockAcquired(lock)]);
    }

    #[test]
    fn test_forced_grant_replaces_owner() {
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let inbox = inbox(me);
        let key = LockKey::Update(Uuid::new_v4());
        inbox.registry.acquire(key.clone(), me, false).unwrap();

        inbox.handle(ServerMessage::LockAcquired {
            lock: Lock::new(key.clone(), other),
            force: true,
        });

        assert_eq!(inbox.registry.owner(&key), Some(other));
    }

    #[test]
    fn test_denial_records_owner() {
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let inbox = inbox(me);
        let key = LockKey::Update(Uuid::new_v4());

        inbox.handle(ServerMessage::LockDenied {
            lock: Lock::new(key.clone(), me),
            owner: other,
        });

        assert_eq!(inbox.registry.owner(&key), Some(other));
        assert_eq!(inbox.metrics.lock_denials.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_release_of_unknown_lock_is_silent() {
        let inbox = inbox(Uuid::new_v4());
        let sub = inbox.events.subscribe();
        inbox.handle(ServerMessage::LockReleased {
            lock: Lock::new(LockKey::Kerbal("Bill".to_string()), Uuid::new_v4()),
        });
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_position_for_own_vessel_dropped() {
        let me = Uuid::new_v4();
        let inbox = inbox(me);
        let vessel = Vessel::new(Uuid::new_v4(), "Mine", OrbitalElements::default());
        inbox.registry.acquire(LockKey::Update(vessel.id), me, false).unwrap();

        inbox.handle(ServerMessage::Position(PositionSnapshot::capture(&vessel, 1.0, 0)));
        assert_eq!(inbox.buffer.len(vessel.id), 0);
    }

    #[test]
    fn test_position_queued_and_stamped() {
        let inbox = inbox(Uuid::new_v4());
        let vessel = Vessel::new(Uuid::new_v4(), "Remote", OrbitalElements::default());

        inbox.handle(ServerMessage::Position(PositionSnapshot::capture(&vessel, 1.0, 0)));
        inbox.handle(ServerMessage::Position(PositionSnapshot::capture(&vessel, 1.0, 0)));

        let queued = inbox.buffer.dequeue(vessel.id).unwrap();
        assert!(queued.received_time > 0);
        assert_eq!(inbox.metrics.snapshots_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(inbox.metrics.snapshots_rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lock_list_replaces_table() {
        let me = Uuid::new_v4();
        let inbox = inbox(me);
        inbox
            .registry
            .acquire(LockKey::Control(Uuid::new_v4()), me, false)
            .unwrap();

        inbox.handle(ServerMessage::LockList { locks: vec![] });
        assert!(inbox.registry.is_empty());
    }

    #[test]
    fn test_lock_list_announces_changes() {
        let (me, other) = (Uuid::new_v4(), Uuid::new_v4());
        let inbox = inbox(me);
        let (kept, dropped, gained) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        inbox.registry.acquire(LockKey::Control(kept), other, false).unwrap();
        inbox.registry.acquire(LockKey::Update(dropped), other, false).unwrap();
        let sub = inbox.events.subscribe();

        inbox.handle(ServerMessage::LockList {
            locks: vec![
                Lock::new(LockKey::Control(kept), other),
                Lock::new(LockKey::Update(gained), me),
            ],
        });

        let events = sub.drain();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&SyncEvent::LockReleased(Lock::new(LockKey::Update(dropped), other))));
        assert!(events.contains(&SyncEvent::LockAcquired(Lock::new(LockKey::Update(gained), me))));
        assert!(inbox.registry.owned_by(&LockKey::Update(gained), me));
    }
}
