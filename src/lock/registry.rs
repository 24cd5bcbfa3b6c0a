//! Lock book-keeping for one peer
//!
//! Every mutation is a single insert/replace/remove under the write lock,
//! so readers never observe a half-applied transfer.

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::lock::types::{Lock, LockKey, LockType, PlayerId};
use crate::vessel::VesselId;

/// Result of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Requester already owned the lock
    AlreadyHeld,
    /// Lock was free and is now owned by the requester
    Acquired,
    /// Lock was forcibly transferred from `previous`
    TakenOver { previous: PlayerId },
}

/// Lock registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("Lock {key} is held by {owner}")]
    Conflict { key: LockKey, owner: PlayerId },
}

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: RwLock<HashMap<LockKey, PlayerId>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` for `player`.
    ///
    /// Owning it already is a no-op success. A foreign owner yields
    /// [`LockError::Conflict`] unless `force` is set, in which case ownership
    /// moves to `player` in one replace.
    pub fn acquire(&self, key: LockKey, player: PlayerId, force: bool) -> Result<AcquireOutcome, LockError> {
        let mut locks = self.locks.write();
        match locks.get(&key).copied() {
            Some(owner) if owner == player => Ok(AcquireOutcome::AlreadyHeld),
            Some(owner) if !force => Err(LockError::Conflict { key, owner }),
            Some(owner) => {
                locks.insert(key, player);
                Ok(AcquireOutcome::TakenOver { previous: owner })
            }
            None => {
                locks.insert(key, player);
                Ok(AcquireOutcome::Acquired)
            }
        }
    }

    /// Release `key` if `player` owns it. Returns whether anything was removed.
    pub fn release(&self, key: &LockKey, player: PlayerId) -> bool {
        let mut locks = self.locks.write();
        if locks.get(key) == Some(&player) {
            locks.remove(key);
            true
        } else {
            false
        }
    }

    /// Release every lock owned by `player`, returning what was removed
    pub fn release_all_owned_by(&self, player: PlayerId) -> Vec<Lock> {
        let mut locks = self.locks.write();
        let released: Vec<Lock> = locks
            .iter()
            .filter(|(_, owner)| **owner == player)
            .map(|(key, owner)| Lock::new(key.clone(), *owner))
            .collect();
        locks.retain(|_, owner| *owner != player);
        released
    }

    /// Replace the whole table (full refresh reply), returning the old one
    pub fn replace_all(&self, entries: impl IntoIterator<Item = Lock>) -> Vec<Lock> {
        let table: HashMap<LockKey, PlayerId> = entries.into_iter().map(|l| (l.key, l.owner)).collect();
        let previous = std::mem::replace(&mut *self.locks.write(), table);
        previous
            .into_iter()
            .map(|(key, owner)| Lock::new(key, owner))
            .collect()
    }

    pub fn exists(&self, key: &LockKey) -> bool {
        self.locks.read().contains_key(key)
    }

    pub fn owner(&self, key: &LockKey) -> Option<PlayerId> {
        self.locks.read().get(key).copied()
    }

    pub fn owned_by(&self, key: &LockKey, player: PlayerId) -> bool {
        self.locks.read().get(key) == Some(&player)
    }

    /// All locks of `lock_type` owned by `player`
    pub fn all_owned_by(&self, player: PlayerId, lock_type: LockType) -> Vec<Lock> {
        self.locks
            .read()
            .iter()
            .filter(|(key, owner)| **owner == player && key.lock_type() == lock_type)
            .map(|(key, owner)| Lock::new(key.clone(), *owner))
            .collect()
    }

    /// Vessel ids of all `lock_type` locks owned by `player`
    pub fn vessels_owned_by(&self, player: PlayerId, lock_type: LockType) -> Vec<VesselId> {
        self.locks
            .read()
            .iter()
            .filter(|(key, owner)| **owner == player && key.lock_type() == lock_type)
            .filter_map(|(key, _)| key.vessel_id())
            .collect()
    }

    pub fn spectator_lock_of(&self, player: PlayerId) -> Option<Lock> {
        let key = LockKey::Spectator(player);
        self.owner(&key).map(|owner| Lock::new(key, owner))
    }

    pub fn control_owner(&self, vessel: VesselId) -> Option<PlayerId> {
        self.owner(&LockKey::Control(vessel))
    }

    /// Copy of the whole table
    pub fn snapshot(&self) -> Vec<Lock> {
        self.locks
            .read()
            .iter()
            .map(|(key, owner)| Lock::new(key.clone(), *owner))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}
