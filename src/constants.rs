/// Simulation tick constants
pub mod tick {
    /// Default fixed simulation rate in Hz
    pub const DEFAULT_RATE: u32 = 50;
    /// Default fixed delta time in seconds
    pub const DEFAULT_DT: f64 = 1.0 / DEFAULT_RATE as f64;
}

/// Lock protocol timing
pub mod lock {
    /// Interval between full lock table refresh requests (ms)
    pub const REFRESH_INTERVAL_MS: u64 = 10_000;
    /// Name of the local input lock set while spectating
    pub const SPECTATE_INPUT_LOCK: &str = "vessel_sync_spectating";
}

/// Spectator notice
pub mod spectate {
    /// Interval between on-screen spectate notices (ms)
    pub const MESSAGE_INTERVAL_MS: u64 = 1_000;
    /// How long each notice stays visible (ms), twice the repost interval
    pub const MESSAGE_DURATION_MS: u64 = 2_000;
}

/// Snapshot buffering and interpolation
pub mod interpolation {
    /// Default per-vessel snapshot queue bound
    pub const QUEUE_CAPACITY: usize = 64;
    /// Outgoing snapshot interval (ms)
    pub const SEND_INTERVAL_MS: u64 = 100;
    /// Progress at which the reference body switches from source to target.
    /// Hard switch, not a blend.
    pub const BODY_SWITCH_PROGRESS: f64 = 0.5;
}

/// Situation thresholds
pub mod situation {
    /// Height above terrain under which a vessel counts as landed (m)
    pub const LANDED_HEIGHT: f64 = 2.0;
    /// Altitude at or below which a vessel resting on the surface counts as splashed (m)
    pub const SEA_LEVEL: f64 = 0.0;
}
