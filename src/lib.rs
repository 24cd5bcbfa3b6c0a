//! Vessel Sync Library
//!
//! Client-side synchronization layer for a multiplayer orbital flight
//! simulation. Players coordinate who controls and who simulates each vessel
//! through advisory locks, and vessels simulated elsewhere follow the position
//! snapshots their updater broadcasts.
//!
//! # Features
//!
//! - `metrics_server` - Prometheus text endpoint used by the demo binary (enabled by default)

pub mod config;
pub mod constants;
pub mod lock;
pub mod metrics;
pub mod net;
pub mod orbit;
pub mod position;
pub mod session;
pub mod util;
pub mod vessel;
