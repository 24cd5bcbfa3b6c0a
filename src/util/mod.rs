use std::time::{SystemTime, UNIX_EPOCH};

pub mod quat;
pub mod vec3;

/// Wall clock in unix milliseconds, as carried in snapshot timestamps
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
