use serde::{Deserialize, Serialize};

use crate::orbit::OrbitalElements;
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;
use crate::vessel::{Vessel, VesselId};

/// Sampled vessel state at one point of game time, as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub vessel_id: VesselId,
    pub body_index: i32,
    /// Sender wall clock (unix ms)
    pub sent_time: i64,
    /// Receiver wall clock (unix ms), zero until received
    pub received_time: i64,
    /// Universal time the sample was taken at; the only ordering key
    pub game_time: f64,
    /// Latitude, longitude (degrees) and altitude (m)
    pub lat_lon_alt: [f64; 3],
    pub terrain_normal: Vec3,
    pub transform_position: Vec3,
    pub velocity: Vec3,
    pub orbit: OrbitalElements,
    /// Surface-relative rotation (x, y, z, w)
    pub surface_rotation: [f32; 4],
    pub height_from_terrain: f32,
}

impl PositionSnapshot {
    /// Sample a live vessel at universal time `ut`
    pub fn capture(vessel: &Vessel, ut: f64, sent_at: i64) -> Self {
        Self {
            vessel_id: vessel.id,
            body_index: vessel.body_index(),
            sent_time: sent_at,
            received_time: 0,
            game_time: ut,
            lat_lon_alt: [vessel.latitude, vessel.longitude, vessel.altitude],
            terrain_normal: vessel.terrain_normal,
            transform_position: vessel.reference_transform,
            velocity: vessel.velocity,
            orbit: vessel.orbit,
            surface_rotation: vessel.surface_rotation.to_array(),
            height_from_terrain: vessel.height_from_terrain as f32,
        }
    }

    /// Stamp the local receipt time
    pub fn received(mut self, at: i64) -> Self {
        self.received_time = at;
        self
    }

    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_array(self.surface_rotation)
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.lat_lon_alt[0]
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.lat_lon_alt[1]
    }

    #[inline]
    pub fn altitude(&self) -> f64 {
        self.lat_lon_alt[2]
    }
}
