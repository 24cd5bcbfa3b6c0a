//! Position snapshots: wire record, per-vessel queues and interpolation

pub mod buffer;
pub mod interpolation;
pub mod snapshot;

pub use buffer::{BufferError, EnqueueOutcome, PositionSnapshotBuffer};
pub use interpolation::{
    ApplyError, InterpolationEngine, InterpolationState, RemovalReason, TickSummary, TrackingPhase, VesselOutcome,
};
pub use snapshot::PositionSnapshot;
