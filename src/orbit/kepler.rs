//! Two-body Kepler propagation
//!
//! Converts between classical orbital elements and body-relative state
//! vectors. Angles follow the flight-sim convention used on the wire:
//! inclination, LAN and argument of periapsis in degrees, mean anomaly at
//! epoch in radians, epoch in seconds of universal time. Hyperbolic orbits
//! carry a negative semi-major axis.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::util::vec3::Vec3;

/// Kepler solver tolerance (radians)
const KEPLER_TOLERANCE: f64 = 1e-14;
/// Kepler solver iteration cap
const KEPLER_MAX_ITERATIONS: usize = 64;
/// Eccentricity below which an orbit is treated as circular
const CIRCULAR_EPSILON: f64 = 1e-11;
/// |1 - e| below which an orbit is treated as parabolic (unsupported)
const PARABOLIC_EPSILON: f64 = 1e-10;

/// The eight orbital values carried by a position snapshot
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OrbitalElements {
    /// Inclination (degrees)
    pub inclination: f64,
    pub eccentricity: f64,
    /// Semi-major axis (meters, negative for hyperbolic)
    pub semi_major_axis: f64,
    /// Longitude of the ascending node (degrees)
    pub lan: f64,
    /// Argument of periapsis (degrees)
    pub argument_of_periapsis: f64,
    /// Mean anomaly at epoch (radians)
    pub mean_anomaly_at_epoch: f64,
    /// Epoch (universal time, seconds)
    pub epoch: f64,
    /// Index of the reference body
    pub reference_body: i32,
}

impl OrbitalElements {
    /// Wire layout: inc, ecc, sma, lan, argPe, mae, epoch, body index
    pub fn from_array(a: [f64; 8]) -> Self {
        Self {
            inclination: a[0],
            eccentricity: a[1],
            semi_major_axis: a[2],
            lan: a[3],
            argument_of_periapsis: a[4],
            mean_anomaly_at_epoch: a[5],
            epoch: a[6],
            reference_body: a[7] as i32,
        }
    }

    pub fn to_array(self) -> [f64; 8] {
        [
            self.inclination,
            self.eccentricity,
            self.semi_major_axis,
            self.lan,
            self.argument_of_periapsis,
            self.mean_anomaly_at_epoch,
            self.epoch,
            self.reference_body as f64,
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Orbit construction/propagation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrbitError {
    #[error("Invalid gravitational parameter: {0}")]
    InvalidGravitationalParameter(f64),
    #[error("Non-finite orbital state")]
    NonFinite,
    #[error("Degenerate orbit: {0}")]
    Degenerate(&'static str),
    #[error("Kepler solver did not converge (M={0})")]
    NoConvergence(f64),
}

/// Analytic two-body orbit around a body with gravitational parameter `mu`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub elements: OrbitalElements,
    pub mu: f64,
}

impl Orbit {
    /// Build an orbit model from elements, rejecting inconsistent shapes
    pub fn new(elements: OrbitalElements, mu: f64) -> Result<Self, OrbitError> {
        if !(mu > 0.0) || !mu.is_finite() {
            return Err(OrbitError::InvalidGravitationalParameter(mu));
        }
        if !elements.is_finite() {
            return Err(OrbitError::NonFinite);
        }
        let e = elements.eccentricity;
        let a = elements.semi_major_axis;
        if e < 0.0 {
            return Err(OrbitError::Degenerate("negative eccentricity"));
        }
        if (e - 1.0).abs() < PARABOLIC_EPSILON {
            return Err(OrbitError::Degenerate("parabolic"));
        }
        if (e < 1.0 && a <= 0.0) || (e > 1.0 && a >= 0.0) {
            return Err(OrbitError::Degenerate("semi-major axis sign mismatch"));
        }
        Ok(Self { elements, mu })
    }

    #[inline]
    pub fn is_hyperbolic(&self) -> bool {
        self.elements.eccentricity > 1.0
    }

    /// Mean motion (rad/s)
    pub fn mean_motion(&self) -> f64 {
        let a = self.elements.semi_major_axis.abs();
        (self.mu / (a * a * a)).sqrt()
    }

    /// Orbital period in seconds (infinite for hyperbolic trajectories)
    pub fn period(&self) -> f64 {
        if self.is_hyperbolic() {
            f64::INFINITY
        } else {
            TAU / self.mean_motion()
        }
    }

    pub fn mean_anomaly_at(&self, ut: f64) -> f64 {
        self.elements.mean_anomaly_at_epoch + self.mean_motion() * (ut - self.elements.epoch)
    }

    /// Body-relative position at universal time `ut`
    pub fn position_at(&self, ut: f64) -> Result<Vec3, OrbitError> {
        self.state_at(ut).map(|(pos, _)| pos)
    }

    /// Body-relative velocity at universal time `ut`
    pub fn velocity_at(&self, ut: f64) -> Result<Vec3, OrbitError> {
        self.state_at(ut).map(|(_, vel)| vel)
    }

    /// Body-relative (position, velocity) at universal time `ut`
    pub fn state_at(&self, ut: f64) -> Result<(Vec3, Vec3), OrbitError> {
        let e = self.elements.eccentricity;
        let a = self.elements.semi_major_axis.abs();
        let m = self.mean_anomaly_at(ut);

        let (x, y, vx, vy) = if self.is_hyperbolic() {
            let h = solve_hyperbolic(m, e)?;
            let (sinh, cosh) = (h.sinh(), h.cosh());
            let r = a * (e * cosh - 1.0);
            let k = (self.mu * a).sqrt() / r;
            let b = (e * e - 1.0).sqrt();
            (a * (e - cosh), a * b * sinh, -k * sinh, k * b * cosh)
        } else {
            let big_e = solve_elliptic(m, e)?;
            let (sin, cos) = big_e.sin_cos();
            let r = a * (1.0 - e * cos);
            let k = (self.mu * a).sqrt() / r;
            let b = (1.0 - e * e).sqrt();
            (a * (cos - e), a * b * sin, -k * sin, k * b * cos)
        };

        let (p, q) = perifocal_basis(&self.elements);
        let pos = p * x + q * y;
        let vel = p * vx + q * vy;
        if !pos.is_finite() || !vel.is_finite() {
            return Err(OrbitError::NonFinite);
        }
        Ok((pos, vel))
    }

    /// Reconstruct an orbit from body-relative state vectors at `ut`.
    /// The resulting elements use `ut` as their epoch.
    pub fn from_state_vectors(
        pos: Vec3,
        vel: Vec3,
        mu: f64,
        ut: f64,
        reference_body: i32,
    ) -> Result<Self, OrbitError> {
        if !(mu > 0.0) || !mu.is_finite() {
            return Err(OrbitError::InvalidGravitationalParameter(mu));
        }
        if !pos.is_finite() || !vel.is_finite() || !ut.is_finite() {
            return Err(OrbitError::NonFinite);
        }

        let r = pos.length();
        let v2 = vel.length_sq();
        if r <= 0.0 {
            return Err(OrbitError::Degenerate("zero radius"));
        }

        let h = pos.cross(vel);
        let h_len = h.length();
        if h_len <= 1e-12 * r * v2.sqrt().max(1.0) {
            return Err(OrbitError::Degenerate("radial trajectory"));
        }

        let energy = v2 * 0.5 - mu / r;
        if energy.abs() <= f64::EPSILON * mu / r {
            return Err(OrbitError::Degenerate("parabolic"));
        }
        let a = -mu / (2.0 * energy);

        let e_vec = (pos * (v2 - mu / r) - vel * pos.dot(vel)) / mu;
        let e = e_vec.length();
        if (e - 1.0).abs() < PARABOLIC_EPSILON {
            return Err(OrbitError::Degenerate("parabolic"));
        }

        let w = h / h_len;
        let inclination = w.z.clamp(-1.0, 1.0).acos();

        let node = Vec3::Z.cross(h);
        let (n_hat, lan) = if node.length() > 1e-12 * h_len {
            let n_hat = node.normalize();
            (n_hat, n_hat.y.atan2(n_hat.x))
        } else {
            (Vec3::X, 0.0)
        };
        let m_hat = w.cross(n_hat);

        let arg_pe = if e > CIRCULAR_EPSILON {
            e_vec.dot(m_hat).atan2(e_vec.dot(n_hat))
        } else {
            0.0
        };

        let (sin_w, cos_w) = arg_pe.sin_cos();
        let p = n_hat * cos_w + m_hat * sin_w;
        let q = w.cross(p);
        let nu = pos.dot(q).atan2(pos.dot(p));

        let mean_anomaly = if e > 1.0 {
            let sinh_h = (e * e - 1.0).sqrt() * nu.sin() / (1.0 + e * nu.cos());
            let big_h = sinh_h.asinh();
            e * sinh_h - big_h
        } else {
            let big_e = ((1.0 - e * e).sqrt() * nu.sin()).atan2(e + nu.cos());
            (big_e - e * big_e.sin()).rem_euclid(TAU)
        };

        let elements = OrbitalElements {
            inclination: inclination.to_degrees(),
            eccentricity: e,
            semi_major_axis: a,
            lan: lan.rem_euclid(TAU).to_degrees(),
            argument_of_periapsis: arg_pe.rem_euclid(TAU).to_degrees(),
            mean_anomaly_at_epoch: mean_anomaly,
            epoch: ut,
            reference_body,
        };
        Orbit::new(elements, mu)
    }
}

/// Unit vectors toward periapsis (P) and 90 degrees ahead in the orbit plane (Q)
fn perifocal_basis(el: &OrbitalElements) -> (Vec3, Vec3) {
    let (sin_o, cos_o) = el.lan.to_radians().sin_cos();
    let (sin_i, cos_i) = el.inclination.to_radians().sin_cos();
    let (sin_w, cos_w) = el.argument_of_periapsis.to_radians().sin_cos();

    let p = Vec3::new(
        cos_o * cos_w - sin_o * sin_w * cos_i,
        sin_o * cos_w + cos_o * sin_w * cos_i,
        sin_w * sin_i,
    );
    let q = Vec3::new(
        -cos_o * sin_w - sin_o * cos_w * cos_i,
        -sin_o * sin_w + cos_o * cos_w * cos_i,
        cos_w * sin_i,
    );
    (p, q)
}

/// Solve E - e sin E = M for the eccentric anomaly
fn solve_elliptic(mean_anomaly: f64, e: f64) -> Result<f64, OrbitError> {
    // Reduce to [-pi, pi] for a stable starting guess
    let m = (mean_anomaly + std::f64::consts::PI).rem_euclid(TAU) - std::f64::consts::PI;
    let mut big_e = if e < 0.8 { m } else { std::f64::consts::PI.copysign(m) };

    for _ in 0..KEPLER_MAX_ITERATIONS {
        let f = big_e - e * big_e.sin() - m;
        let step = f / (1.0 - e * big_e.cos());
        big_e -= step;
        if step.abs() < KEPLER_TOLERANCE {
            return Ok(big_e);
        }
    }
    Err(OrbitError::NoConvergence(mean_anomaly))
}

/// Solve e sinh H - H = M for the hyperbolic anomaly
fn solve_hyperbolic(mean_anomaly: f64, e: f64) -> Result<f64, OrbitError> {
    let m = mean_anomaly;
    let mut big_h = (m / e).asinh();

    for _ in 0..KEPLER_MAX_ITERATIONS {
        let f = e * big_h.sinh() - big_h - m;
        let step = f / (e * big_h.cosh() - 1.0);
        big_h -= step;
        if step.abs() < KEPLER_TOLERANCE * big_h.abs().max(1.0) {
            return Ok(big_h);
        }
    }
    Err(OrbitError::NoConvergence(mean_anomaly))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Kerbin-like gravitational parameter
    const MU: f64 = 3.5316e12;

    fn leo() -> OrbitalElements {
        OrbitalElements {
            inclination: 28.5,
            eccentricity: 0.05,
            semi_major_axis: 700_000.0,
            lan: 40.0,
            argument_of_periapsis: 75.0,
            mean_anomaly_at_epoch: 1.1,
            epoch: 100.0,
            reference_body: 1,
        }
    }

    fn assert_relative(a: Vec3, b: Vec3, tol: f64) {
        let err = (a - b).length() / b.length().max(1.0);
        assert!(err < tol, "relative error {} exceeds {} ({:?} vs {:?})", err, tol, a, b);
    }

    #[test]
    fn test_circular_equatorial_radius_and_speed() {
        let el = OrbitalElements {
            semi_major_axis: 700_000.0,
            ..Default::default()
        };
        let orbit = Orbit::new(el, MU).unwrap();
        let (pos, vel) = orbit.state_at(0.0).unwrap();
        assert!((pos.length() - 700_000.0).abs() < 1e-6);
        assert!((vel.length() - (MU / 700_000.0).sqrt()).abs() < 1e-6);
        assert!(pos.z.abs() < 1e-9);
    }

    #[test]
    fn test_elements_state_roundtrip_position() {
        let orbit = Orbit::new(leo(), MU).unwrap();
        let (pos, vel) = orbit.state_at(250.0).unwrap();

        let rebuilt = Orbit::from_state_vectors(pos, vel, MU, 250.0, 1).unwrap();
        let (pos2, vel2) = rebuilt.state_at(250.0).unwrap();

        assert_relative(pos2, pos, 1e-6);
        assert_relative(vel2, vel, 1e-6);
    }

    #[test]
    fn test_roundtrip_recovers_shape_elements() {
        let el = leo();
        let orbit = Orbit::new(el, MU).unwrap();
        let (pos, vel) = orbit.state_at(el.epoch).unwrap();
        let rebuilt = Orbit::from_state_vectors(pos, vel, MU, el.epoch, 1).unwrap().elements;

        assert!((rebuilt.inclination - el.inclination).abs() < 1e-8);
        assert!((rebuilt.eccentricity - el.eccentricity).abs() < 1e-10);
        assert!((rebuilt.semi_major_axis - el.semi_major_axis).abs() / el.semi_major_axis < 1e-9);
        assert!((rebuilt.lan - el.lan).abs() < 1e-8);
        assert!((rebuilt.argument_of_periapsis - el.argument_of_periapsis).abs() < 1e-7);
        assert!((rebuilt.mean_anomaly_at_epoch - el.mean_anomaly_at_epoch).abs() < 1e-8);
        assert_eq!(rebuilt.reference_body, 1);
    }

    #[test]
    fn test_roundtrip_later_time_same_trajectory() {
        let orbit = Orbit::new(leo(), MU).unwrap();
        let (pos, vel) = orbit.state_at(400.0).unwrap();
        let rebuilt = Orbit::from_state_vectors(pos, vel, MU, 400.0, 1).unwrap();

        // Both models describe the same trajectory at any other time
        assert_relative(rebuilt.position_at(1000.0).unwrap(), orbit.position_at(1000.0).unwrap(), 1e-6);
    }

    #[test]
    fn test_hyperbolic_roundtrip() {
        let el = OrbitalElements {
            inclination: 12.0,
            eccentricity: 1.4,
            semi_major_axis: -2_000_000.0,
            lan: 200.0,
            argument_of_periapsis: 10.0,
            mean_anomaly_at_epoch: 0.3,
            epoch: 0.0,
            reference_body: 1,
        };
        let orbit = Orbit::new(el, MU).unwrap();
        assert!(orbit.is_hyperbolic());
        assert!(orbit.period().is_infinite());

        let (pos, vel) = orbit.state_at(60.0).unwrap();
        let rebuilt = Orbit::from_state_vectors(pos, vel, MU, 60.0, 1).unwrap();
        assert!(rebuilt.is_hyperbolic());
        assert_relative(rebuilt.position_at(60.0).unwrap(), pos, 1e-6);
    }

    #[test]
    fn test_retrograde_equatorial_roundtrip() {
        let el = OrbitalElements {
            inclination: 180.0,
            eccentricity: 0.1,
            semi_major_axis: 900_000.0,
            argument_of_periapsis: 30.0,
            mean_anomaly_at_epoch: 2.0,
            ..Default::default()
        };
        let orbit = Orbit::new(el, MU).unwrap();
        let (pos, vel) = orbit.state_at(10.0).unwrap();
        let rebuilt = Orbit::from_state_vectors(pos, vel, MU, 10.0, 0).unwrap();
        assert_relative(rebuilt.position_at(10.0).unwrap(), pos, 1e-6);
        assert_relative(rebuilt.velocity_at(10.0).unwrap(), vel, 1e-6);
    }

    #[test]
    fn test_period_matches_propagation() {
        let orbit = Orbit::new(leo(), MU).unwrap();
        let p0 = orbit.position_at(100.0).unwrap();
        let p1 = orbit.position_at(100.0 + orbit.period()).unwrap();
        assert_relative(p1, p0, 1e-8);
    }

    #[test]
    fn test_rejects_sign_mismatch() {
        let el = OrbitalElements {
            eccentricity: 0.5,
            semi_major_axis: -100.0,
            ..Default::default()
        };
        assert!(matches!(Orbit::new(el, MU), Err(OrbitError::Degenerate(_))));
    }

    #[test]
    fn test_rejects_radial_state() {
        let pos = Vec3::new(700_000.0, 0.0, 0.0);
        let vel = Vec3::new(100.0, 0.0, 0.0);
        assert!(matches!(
            Orbit::from_state_vectors(pos, vel, MU, 0.0, 1),
            Err(OrbitError::Degenerate(_))
        ));
    }

    #[test]
    fn test_rejects_bad_mu() {
        assert!(matches!(
            Orbit::new(leo(), 0.0),
            Err(OrbitError::InvalidGravitationalParameter(_))
        ));
    }

    #[test]
    fn test_elements_array_layout() {
        let el = leo();
        let back = OrbitalElements::from_array(el.to_array());
        assert_eq!(back, el);
    }
}
