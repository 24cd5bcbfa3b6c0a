//! Orbital mechanics used to reconstruct vessel trajectories

pub mod body;
pub mod kepler;

pub use body::CelestialBody;
pub use kepler::{Orbit, OrbitError, OrbitalElements};
