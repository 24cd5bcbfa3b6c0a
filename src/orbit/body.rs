use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// A celestial body vessels can orbit or rest on.
///
/// Positions handled here are body-centered; the body rotates about +Z.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CelestialBody {
    pub index: i32,
    pub name: String,
    /// Standard gravitational parameter (m^3/s^2)
    pub gravitational_parameter: f64,
    /// Mean surface radius (m)
    pub radius: f64,
    /// Sidereal rotation period (s), zero for a non-rotating body
    pub rotation_period: f64,
    /// Rotation angle at UT 0 (radians)
    pub initial_rotation: f64,
    /// Altitude below which a vessel counts as flying rather than in space (m)
    pub atmosphere_depth: f64,
}

impl CelestialBody {
    pub fn new(index: i32, name: impl Into<String>, gravitational_parameter: f64, radius: f64) -> Self {
        Self {
            index,
            name: name.into(),
            gravitational_parameter,
            radius,
            rotation_period: 0.0,
            initial_rotation: 0.0,
            atmosphere_depth: 0.0,
        }
    }

    pub fn with_rotation(mut self, rotation_period: f64, initial_rotation: f64) -> Self {
        self.rotation_period = rotation_period;
        self.initial_rotation = initial_rotation;
        self
    }

    pub fn with_atmosphere(mut self, depth: f64) -> Self {
        self.atmosphere_depth = depth;
        self
    }

    /// Rotation angle about +Z at universal time `ut` (radians)
    pub fn rotation_angle(&self, ut: f64) -> f64 {
        if self.rotation_period > 0.0 {
            (self.initial_rotation + TAU * ut / self.rotation_period).rem_euclid(TAU)
        } else {
            self.initial_rotation
        }
    }

    /// Body frame orientation at `ut`
    pub fn rotation(&self, ut: f64) -> Quat {
        Quat::from_axis_angle(Vec3::Z, self.rotation_angle(ut))
    }

    /// Body-relative position of a point given latitude/longitude (degrees)
    /// and altitude above the mean radius
    pub fn surface_position(&self, latitude: f64, longitude: f64, altitude: f64, ut: f64) -> Vec3 {
        let r = self.radius + altitude;
        let lat = latitude.to_radians();
        let lon = longitude.to_radians() + self.rotation_angle(ut);
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();
        Vec3::new(r * cos_lat * cos_lon, r * cos_lat * sin_lon, r * sin_lat)
    }

    /// Inverse of [`surface_position`](Self::surface_position): (lat, lon, alt)
    pub fn lat_lon_alt(&self, position: Vec3, ut: f64) -> (f64, f64, f64) {
        let r = position.length();
        if r <= 0.0 {
            return (0.0, 0.0, -self.radius);
        }
        let latitude = (position.z / r).clamp(-1.0, 1.0).asin().to_degrees();
        let raw_lon = position.y.atan2(position.x) - self.rotation_angle(ut);
        (latitude, wrap_longitude(raw_lon.to_degrees()), r - self.radius)
    }

    /// Great-circle surface distance between two lat/lon pairs (degrees)
    pub fn surface_distance(&self, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
        let dp = p2 - p1;
        let dl = (lon2 - lon1).to_radians();
        let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
        2.0 * self.radius * a.sqrt().min(1.0).asin()
    }
}

/// Wrap a longitude in degrees into (-180, 180]
pub fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}
