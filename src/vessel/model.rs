//! Vessel state as seen by the local simulation
//!
//! Fields are grouped the way the sync layer touches them: the pose written
//! every tick first, then flags read by the lock policy, then the cold data.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::situation::{LANDED_HEIGHT, SEA_LEVEL};
use crate::orbit::{CelestialBody, Orbit, OrbitError, OrbitalElements};
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Unique vessel identifier
pub type VesselId = Uuid;

/// Flight situation, ordered from surface-bound to free flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Situation {
    Prelaunch,
    Landed,
    Splashed,
    Flying,
    SubOrbital,
    Orbiting,
    Escaping,
}

impl Situation {
    #[inline]
    pub fn is_landed_or_splashed(self) -> bool {
        matches!(self, Situation::Prelaunch | Situation::Landed | Situation::Splashed)
    }
}

/// Single part of a vessel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub mass: f64,
    /// Offset from the vessel origin in the vessel frame
    pub offset: Vec3,
    pub velocity: Vec3,
}

impl Part {
    pub fn new(mass: f64, offset: Vec3) -> Self {
        Self {
            mass,
            offset,
            velocity: Vec3::ZERO,
        }
    }
}

/// Derived physics values refreshed on demand
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PhysicsStats {
    pub total_mass: f64,
    /// Center of mass, body-relative
    pub center_of_mass: Vec3,
}

/// State written to the save file
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub height_from_terrain: f64,
    pub terrain_normal: Vec3,
    pub surface_rotation: Quat,
    pub orbit: OrbitalElements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vessel {
    // === POSE (written by interpolation) ===
    /// Body-relative position
    pub position: Vec3,
    /// Body-relative velocity
    pub velocity: Vec3,
    /// Rotation relative to the body surface frame
    pub surface_rotation: Quat,
    /// Rotation in the body-centered inertial frame
    pub rotation: Quat,
    pub orbit: OrbitalElements,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub height_from_terrain: f64,
    pub terrain_normal: Vec3,
    pub reference_transform: Vec3,

    // === FLAGS (read by lock policy) ===
    pub loaded: bool,
    pub dead: bool,
    pub is_eva: bool,
    pub situation: Situation,

    // === COLD ===
    pub id: VesselId,
    pub name: String,
    pub crew: Vec<String>,
    pub parts: Vec<Part>,
    pub physics: PhysicsStats,
    pub persisted: PersistedState,
}

impl Vessel {
    pub fn new(id: VesselId, name: impl Into<String>, orbit: OrbitalElements) -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            surface_rotation: Quat::IDENTITY,
            rotation: Quat::IDENTITY,
            orbit,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            height_from_terrain: -1.0,
            terrain_normal: Vec3::Z,
            reference_transform: Vec3::ZERO,
            loaded: true,
            dead: false,
            is_eva: false,
            situation: Situation::Orbiting,
            id,
            name: name.into(),
            crew: Vec::new(),
            parts: vec![Part::new(1_000.0, Vec3::ZERO)],
            physics: PhysicsStats::default(),
            persisted: PersistedState::default(),
        }
    }

    #[inline]
    pub fn body_index(&self) -> i32 {
        self.orbit.reference_body
    }

    #[inline]
    pub fn landed_or_splashed(&self) -> bool {
        self.situation.is_landed_or_splashed()
    }

    /// Recompute situation from altitude, terrain height and orbit shape
    pub fn refresh_situation(&mut self, body: &CelestialBody) {
        let on_ground = self.height_from_terrain >= 0.0 && self.height_from_terrain <= LANDED_HEIGHT;
        if self.situation == Situation::Prelaunch && on_ground {
            return;
        }

        self.situation = if on_ground && self.altitude > SEA_LEVEL {
            Situation::Landed
        } else if self.altitude <= SEA_LEVEL {
            Situation::Splashed
        } else if self.altitude < body.atmosphere_depth {
            Situation::Flying
        } else if self.orbit.eccentricity >= 1.0 {
            Situation::Escaping
        } else {
            let periapsis = self.orbit.semi_major_axis * (1.0 - self.orbit.eccentricity);
            if periapsis < body.radius + body.atmosphere_depth {
                Situation::SubOrbital
            } else {
                Situation::Orbiting
            }
        };
    }

    /// Place the vessel where its orbit puts it at `ut`
    pub fn update_from_orbit(&mut self, body: &CelestialBody, ut: f64) -> Result<(), OrbitError> {
        let orbit = Orbit::new(self.orbit, body.gravitational_parameter)?;
        self.position = orbit.position_at(ut)?;
        self.reference_transform = self.position;
        Ok(())
    }

    /// Refresh latitude/longitude/altitude from the current position
    pub fn update_pos_vel(&mut self, body: &CelestialBody, ut: f64) {
        let (lat, lon, alt) = body.lat_lon_alt(self.position, ut);
        self.latitude = lat;
        self.longitude = lon;
        self.altitude = alt;
    }

    /// Snap the vessel onto the surface at its current lat/lon/alt
    pub fn set_surface_position(&mut self, body: &CelestialBody, ut: f64) {
        self.position = body.surface_position(self.latitude, self.longitude, self.altitude, ut);
        self.reference_transform = self.position;
    }

    /// Set the surface-relative rotation and derive the inertial one
    pub fn set_rotation(&mut self, body: &CelestialBody, ut: f64, surface_rotation: Quat) {
        self.surface_rotation = surface_rotation;
        self.rotation = body.rotation(ut) * surface_rotation;
    }

    /// Push the vessel velocity down to every part
    pub fn resume_part_velocity(&mut self) {
        let velocity = self.velocity;
        for part in &mut self.parts {
            part.velocity = velocity;
        }
    }

    pub fn recalculate_physics_stats(&mut self) {
        let total_mass: f64 = self.parts.iter().map(|p| p.mass).sum();
        let center_of_mass = if total_mass > 0.0 {
            let weighted = self
                .parts
                .iter()
                .fold(Vec3::ZERO, |acc, p| acc + self.rotation.rotate(p.offset) * p.mass);
            self.position + weighted / total_mass
        } else {
            self.position
        };
        self.physics = PhysicsStats {
            total_mass,
            center_of_mass,
        };
    }

    /// Pose contains no NaN/Infinity
    pub fn is_pose_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.rotation.is_finite()
            && self.surface_rotation.is_finite()
            && self.orbit.is_finite()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite()
    }
}
