//! Observer mode layered on top of the lock policy
//!
//! While spectating, the policy's update and unloaded-update candidate sets
//! are empty and every such lock the player holds is released.

use crate::constants::lock::SPECTATE_INPUT_LOCK;
use crate::lock::policy::LockPlan;
use crate::lock::registry::LockRegistry;
use crate::lock::types::{LockKey, LockRequest, PlayerId};
use crate::vessel::{VesselId, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectateState {
    Normal,
    Spectating { vessel: VesselId },
}

#[derive(Debug, Clone)]
pub struct SpectatingCoordinator {
    player: PlayerId,
    state: SpectateState,
}

impl SpectatingCoordinator {
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            state: SpectateState::Normal,
        }
    }

    pub fn state(&self) -> SpectateState {
        self.state
    }

    pub fn is_spectating(&self) -> bool {
        matches!(self.state, SpectateState::Spectating { .. })
    }

    /// Vessel being observed, if any
    pub fn spectated_vessel(&self) -> Option<VesselId> {
        match self.state {
            SpectateState::Spectating { vessel } => Some(vessel),
            SpectateState::Normal => None,
        }
    }

    /// Normal -> Spectating. Blocks local input, disables EVA and requests the
    /// player's spectator lock if it is not held yet. Returns `None` when
    /// already spectating.
    pub fn start(&mut self, vessel: VesselId, registry: &LockRegistry, world: &mut World) -> Option<LockPlan> {
        if let SpectateState::Spectating { vessel: current } = self.state {
            if current == vessel {
                return None;
            }
            // Switching targets keeps the locks, only the observed vessel changes
            self.state = SpectateState::Spectating { vessel };
            return Some(LockPlan::default());
        }

        world.set_input_lock(SPECTATE_INPUT_LOCK);

        let mut plan = LockPlan::default();
        if world.active_vessel.is_some() && registry.spectator_lock_of(self.player).is_none() {
            plan.acquire.push(LockRequest::new(LockKey::Spectator(self.player)));
        }

        world.can_eva = false;
        self.state = SpectateState::Spectating { vessel };
        Some(plan)
    }

    /// Spectating -> Normal. Releases the input and spectator locks and
    /// restores EVA. Returns `None` when not spectating.
    pub fn stop(&mut self, world: &mut World) -> Option<LockPlan> {
        if !self.is_spectating() {
            return None;
        }

        world.remove_input_lock(SPECTATE_INPUT_LOCK);

        let mut plan = LockPlan::default();
        plan.release.push(LockKey::Spectator(self.player));

        world.can_eva = true;
        self.state = SpectateState::Normal;
        Some(plan)
    }
}
