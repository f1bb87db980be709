//! Microsecond time helpers
//!
//! Media and wall-clock times are carried as signed microseconds so that
//! lateness and early/late deltas can be negative.

use std::time::Duration;

/// Convert a signed microsecond delay to a Duration (negative clamps to zero)
pub fn micros_to_duration(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

/// Convert a Duration to signed microseconds, saturating at i64::MAX
pub fn duration_to_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Microseconds as fractional seconds (for log output)
pub fn micros_to_secs(us: i64) -> f64 {
    us as f64 / 1e6
}
