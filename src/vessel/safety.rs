use serde::{Deserialize, Serialize};

use crate::orbit::CelestialBody;
use crate::vessel::model::Vessel;

/// Protected zone around a launch site. Vessels inside are never
/// update-locked by anyone but their controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyBubble {
    pub body_index: i32,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub radius: f64,
}

impl SafetyBubble {
    pub fn new(body_index: i32, latitude: f64, longitude: f64, radius: f64) -> Self {
        Self {
            body_index,
            latitude,
            longitude,
            radius,
        }
    }

    /// Straight-line distance check against the bubble center on the surface
    pub fn contains(&self, vessel: &Vessel, body: &CelestialBody, ut: f64) -> bool {
        if vessel.body_index() != self.body_index || body.index != self.body_index {
            return false;
        }
        let center = body.surface_position(self.latitude, self.longitude, 0.0, ut);
        let here = body.surface_position(vessel.latitude, vessel.longitude, vessel.altitude, ut);
        center.distance_to(here) <= self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbit::OrbitalElements;
    use uuid::Uuid;

    fn vessel_at(lat: f64, lon: f64, alt: f64) -> Vessel {
        let orbit = OrbitalElements {
            reference_body: 1,
            semi_major_axis: 600_000.0,
            ..Default::default()
        };
        let mut v = Vessel::new(Uuid::new_v4(), "Pad", orbit);
        v.latitude = lat;
        v.longitude = lon;
        v.altitude = alt;
        v
    }

    #[test]
    fn test_inside_bubble() {
        let body = CelestialBody::new(1, "Kerbin", 3.5316e12, 600_000.0);
        let bubble = SafetyBubble::new(1, -0.0972, -74.5577, 100.0);
        assert!(bubble.contains(&vessel_at(-0.0972, -74.5577, 20.0), &body, 0.0));
    }

    #[test]
    fn test_outside_bubble() {
        let body = CelestialBody::new(1, "Kerbin", 3.5316e12, 600_000.0);
        let bubble = SafetyBubble::new(1, -0.0972, -74.5577, 100.0);
        assert!(!bubble.contains(&vessel_at(-0.0972, -74.0, 20.0), &body, 0.0));
        assert!(!bubble.contains(&vessel_at(-0.0972, -74.5577, 5_000.0), &body, 0.0));
    }

    #[test]
    fn test_other_body_never_inside() {
        let body = CelestialBody::new(2, "Mun", 6.5138e10, 200_000.0);
        let bubble = SafetyBubble::new(1, 0.0, 0.0, 1e9);
        let mut v = vessel_at(0.0, 0.0, 0.0);
        v.orbit.reference_body = 2;
        assert!(!bubble.contains(&v, &body, 0.0));
    }
}
