//! Vessel lock system
//!
//! Advisory ownership records deciding which peer simulates which vessel,
//! the per-tick policy that requests and drops them, and spectator mode.

pub mod policy;
pub mod registry;
pub mod spectate;
pub mod types;

pub use policy::{LockAcquisitionPolicy, LockPlan};
pub use registry::{AcquireOutcome, LockError, LockRegistry};
pub use spectate::{SpectateState, SpectatingCoordinator};
pub use types::{Lock, LockKey, LockRequest, LockType, PlayerId};
