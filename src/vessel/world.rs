//! Local view of the simulation: vessels, bodies and flight parameters

use hashbrown::{HashMap, HashSet};

use crate::orbit::{CelestialBody, Orbit};
use crate::vessel::model::{Vessel, VesselId};
use crate::vessel::safety::SafetyBubble;

#[derive(Debug, Clone)]
pub struct World {
    /// Universal time in seconds
    pub universal_time: f64,
    pub active_vessel: Option<VesselId>,
    pub safety_bubbles: Vec<SafetyBubble>,
    /// Whether the player may leave the vessel on foot
    pub can_eva: bool,
    bodies: Vec<CelestialBody>,
    vessels: HashMap<VesselId, Vessel>,
    input_locks: HashSet<String>,
}

impl World {
    pub fn new(bodies: Vec<CelestialBody>) -> Self {
        Self {
            universal_time: 0.0,
            active_vessel: None,
            safety_bubbles: Vec::new(),
            can_eva: true,
            bodies,
            vessels: HashMap::new(),
            input_locks: HashSet::new(),
        }
    }

    /// Body by index, `None` when the index cannot be resolved
    pub fn body(&self, index: i32) -> Option<&CelestialBody> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.bodies.get(i))
            .filter(|b| b.index == index)
    }

    pub fn bodies(&self) -> &[CelestialBody] {
        &self.bodies
    }

    pub fn add_vessel(&mut self, vessel: Vessel) {
        self.vessels.insert(vessel.id, vessel);
    }

    pub fn remove_vessel(&mut self, id: VesselId) -> Option<Vessel> {
        if self.active_vessel == Some(id) {
            self.active_vessel = None;
        }
        self.vessels.remove(&id)
    }

    pub fn vessel(&self, id: VesselId) -> Option<&Vessel> {
        self.vessels.get(&id)
    }

    pub fn vessel_mut(&mut self, id: VesselId) -> Option<&mut Vessel> {
        self.vessels.get_mut(&id)
    }

    pub fn vessels(&self) -> impl Iterator<Item = &Vessel> {
        self.vessels.values()
    }

    pub fn loaded_vessels(&self) -> impl Iterator<Item = &Vessel> {
        self.vessels.values().filter(|v| v.loaded)
    }

    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    pub fn active(&self) -> Option<&Vessel> {
        self.active_vessel.and_then(|id| self.vessels.get(&id))
    }

    pub fn is_in_safety_bubble(&self, vessel: &Vessel) -> bool {
        let Some(body) = self.body(vessel.body_index()) else {
            return false;
        };
        self.safety_bubbles
            .iter()
            .any(|b| b.contains(vessel, body, self.universal_time))
    }

    pub fn set_input_lock(&mut self, name: &str) {
        self.input_locks.insert(name.to_string());
    }

    pub fn remove_input_lock(&mut self, name: &str) {
        self.input_locks.remove(name);
    }

    pub fn has_input_lock(&self, name: &str) -> bool {
        self.input_locks.contains(name)
    }

    pub fn advance_time(&mut self, dt: f64) {
        self.universal_time += dt;
    }

    /// Move a vessel along its own orbit to the current universal time
    /// (on-rails propagation for vessels this peer simulates)
    pub fn propagate_vessel(&mut self, id: VesselId) -> bool {
        let ut = self.universal_time;
        let Some(vessel) = self.vessels.get(&id) else {
            return false;
        };
        let Some(body) = self.body(vessel.body_index()).cloned() else {
            return false;
        };
        let Ok(orbit) = Orbit::new(vessel.orbit, body.gravitational_parameter) else {
            return false;
        };
        let Ok((position, velocity)) = orbit.state_at(ut) else {
            return false;
        };

        let Some(vessel) = self.vessels.get_mut(&id) else {
            return false;
        };
        vessel.position = position;
        vessel.reference_transform = position;
        vessel.velocity = velocity;
        vessel.update_pos_vel(&body, ut);
        vessel.refresh_situation(&body);
        true
    }
}
