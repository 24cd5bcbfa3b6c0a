//! Vessel model and the local simulation world the sync layer reads and writes

pub mod model;
pub mod safety;
pub mod world;

pub use model::{Part, PersistedState, PhysicsStats, Situation, Vessel, VesselId};
pub use safety::SafetyBubble;
pub use world::World;
