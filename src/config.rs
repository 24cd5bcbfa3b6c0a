use std::time::Duration;
use uuid::Uuid;

use crate::constants::{interpolation, lock, spectate, tick};
use crate::lock::types::PlayerId;

/// Sync session configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Local player identity (settings store)
    pub player_id: PlayerId,
    /// Fixed simulation tick rate in Hz
    pub tick_rate_hz: u32,
    /// Interval between full lock table requests
    pub lock_refresh_interval_ms: u64,
    /// Interval between on-screen spectate notices
    pub spectate_message_interval_ms: u64,
    /// Interval between outgoing position snapshots
    pub position_send_interval_ms: u64,
    /// Per-vessel snapshot queue bound
    pub snapshot_queue_capacity: usize,
    /// Blend between snapshots; false applies the newest one directly
    pub interpolation_enabled: bool,
    /// Port for the metrics endpoint
    pub metrics_port: u16,
}

/// Rejected configuration value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: u64 },
    #[error("{field} must not exceed {max}")]
    TooLarge { field: &'static str, max: u64 },
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            player_id: Uuid::new_v4(),
            tick_rate_hz: tick::DEFAULT_RATE,
            lock_refresh_interval_ms: lock::REFRESH_INTERVAL_MS,
            spectate_message_interval_ms: spectate::MESSAGE_INTERVAL_MS,
            position_send_interval_ms: interpolation::SEND_INTERVAL_MS,
            snapshot_queue_capacity: interpolation::QUEUE_CAPACITY,
            interpolation_enabled: true,
            metrics_port: 9091,
        }
    }
}

/// Parse an env var, warning and keeping the default on bad input
fn env_parse<T: std::str::FromStr>(name: &str, accept: impl Fn(&T) -> bool) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} '{}' out of range, using default", name, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

impl SyncConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(id) = env_parse::<Uuid>("PLAYER_ID", |_| true) {
            config.player_id = id;
        }
        if let Some(rate) = env_parse::<u32>("TICK_RATE_HZ", |r| (1..=1000).contains(r)) {
            config.tick_rate_hz = rate;
        }
        if let Some(ms) = env_parse::<u64>("LOCK_REFRESH_INTERVAL_MS", |ms| *ms > 0) {
            config.lock_refresh_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("SPECTATE_MESSAGE_INTERVAL_MS", |ms| *ms > 0) {
            config.spectate_message_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("POSITION_SEND_INTERVAL_MS", |ms| *ms > 0) {
            config.position_send_interval_ms = ms;
        }
        if let Some(cap) = env_parse::<usize>("SNAPSHOT_QUEUE_CAPACITY", |c| *c > 0) {
            config.snapshot_queue_capacity = cap;
        }
        if let Some(enabled) = env_parse::<bool>("INTERPOLATION_ENABLED", |_| true) {
            config.interpolation_enabled = enabled;
        }
        if let Some(port) = env_parse::<u16>("METRICS_PORT", |p| *p > 0) {
            config.metrics_port = port;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::TooSmall {
                field: "tick_rate_hz",
                min: 1,
            });
        }
        if self.tick_rate_hz > 1000 {
            return Err(ConfigError::TooLarge {
                field: "tick_rate_hz",
                max: 1000,
            });
        }
        if self.snapshot_queue_capacity < 2 {
            // Interpolation needs a source and a target
            return Err(ConfigError::TooSmall {
                field: "snapshot_queue_capacity",
                min: 2,
            });
        }
        for (field, ms) in [
            ("lock_refresh_interval_ms", self.lock_refresh_interval_ms),
            ("spectate_message_interval_ms", self.spectate_message_interval_ms),
            ("position_send_interval_ms", self.position_send_interval_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::TooSmall { field, min: 1 });
            }
        }
        Ok(())
    }

    /// Fixed tick length in seconds
    pub fn tick_dt(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.tick_dt())
    }

    pub fn lock_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.lock_refresh_interval_ms)
    }

    pub fn spectate_message_interval(&self) -> Duration {
        Duration::from_millis(self.spectate_message_interval_ms)
    }

    pub fn position_send_interval(&self) -> Duration {
        Duration::from_millis(self.position_send_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_rate_hz, 50);
        assert_eq!(config.lock_refresh_interval_ms, 10_000);
        assert_eq!(config.snapshot_queue_capacity, 64);
        assert!(config.interpolation_enabled);
        assert!(config.validate().is_ok());
        assert!((config.tick_dt() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = SyncConfig {
            position_send_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooSmall {
                field: "position_send_interval_ms",
                min: 1
            })
        );
    }

    #[test]
    fn test_validate_rejects_tiny_queue() {
        let config = SyncConfig {
            snapshot_queue_capacity: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = SyncConfig::load_or_default();
        assert!(config.tick_rate_hz > 0);
    }
}
