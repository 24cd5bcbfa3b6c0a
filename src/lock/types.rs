use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::vessel::VesselId;

/// Unique player identifier
pub type PlayerId = Uuid;

/// Lock category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Right to fly the vessel
    Control,
    /// Right to simulate a loaded vessel and broadcast its position
    Update,
    /// Right to propagate an unloaded vessel on rails
    UnloadedUpdate,
    /// Right to a crew member
    Kerbal,
    /// Per-player marker held while observing another player's vessel
    Spectator,
}

impl LockType {
    pub const ALL: [LockType; 5] = [
        LockType::Control,
        LockType::Update,
        LockType::UnloadedUpdate,
        LockType::Kerbal,
        LockType::Spectator,
    ];
}

/// Registry key: a lock type together with its subject.
///
/// At most one owner exists per key. Spectator locks are keyed by player,
/// which makes them a per-player singleton.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKey {
    Control(VesselId),
    Update(VesselId),
    UnloadedUpdate(VesselId),
    Kerbal(String),
    Spectator(PlayerId),
}

impl LockKey {
    pub fn lock_type(&self) -> LockType {
        match self {
            LockKey::Control(_) => LockType::Control,
            LockKey::Update(_) => LockType::Update,
            LockKey::UnloadedUpdate(_) => LockType::UnloadedUpdate,
            LockKey::Kerbal(_) => LockType::Kerbal,
            LockKey::Spectator(_) => LockType::Spectator,
        }
    }

    /// Vessel this lock refers to, if it is a vessel lock
    pub fn vessel_id(&self) -> Option<VesselId> {
        match self {
            LockKey::Control(id) | LockKey::Update(id) | LockKey::UnloadedUpdate(id) => Some(*id),
            LockKey::Kerbal(_) | LockKey::Spectator(_) => None,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Control(id) => write!(f, "Control({})", id),
            LockKey::Update(id) => write!(f, "Update({})", id),
            LockKey::UnloadedUpdate(id) => write!(f, "UnloadedUpdate({})", id),
            LockKey::Kerbal(name) => write!(f, "Kerbal({})", name),
            LockKey::Spectator(player) => write!(f, "Spectator({})", player),
        }
    }
}

/// A registry entry: key plus owning player
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lock {
    pub key: LockKey,
    pub owner: PlayerId,
}

impl Lock {
    pub fn new(key: LockKey, owner: PlayerId) -> Self {
        Self { key, owner }
    }

    #[inline]
    pub fn lock_type(&self) -> LockType {
        self.key.lock_type()
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.key, self.owner)
    }
}

/// Acquire request produced by the policy or the spectating coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub key: LockKey,
    pub force: bool,
}

impl LockRequest {
    pub fn new(key: LockKey) -> Self {
        Self { key, force: false }
    }

    pub fn forced(key: LockKey) -> Self {
        Self { key, force: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_types_are_exhaustive() {
        let v = Uuid::new_v4();
        let keys = [
            LockKey::Control(v),
            LockKey::Update(v),
            LockKey::UnloadedUpdate(v),
            LockKey::Kerbal("Jebediah".to_string()),
            LockKey::Spectator(Uuid::new_v4()),
        ];
        let types: Vec<LockType> = keys.iter().map(|k| k.lock_type()).collect();
        assert_eq!(types, LockType::ALL.to_vec());
    }

    #[test]
    fn test_vessel_id() {
        let v = Uuid::new_v4();
        assert_eq!(LockKey::Update(v).vessel_id(), Some(v));
        assert_eq!(LockKey::Kerbal("Bob".to_string()).vessel_id(), None);
        assert_eq!(LockKey::Spectator(v).vessel_id(), None);
    }

    #[test]
    fn test_same_subject_different_type_distinct() {
        let v = Uuid::new_v4();
        assert_ne!(LockKey::Update(v), LockKey::UnloadedUpdate(v));
    }
}
