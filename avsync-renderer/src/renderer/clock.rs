//! Monotonic wall clock in microseconds
//!
//! Built on the tokio clock so a paused test runtime drives it
//! deterministically. Shared between handles and the renderer task, so both
//! sides agree on "now" (stall request times are stamped on caller threads).

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct MediaClock {
    epoch: Instant,
}

impl MediaClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Microseconds since the clock was created
    pub fn now_us(&self) -> i64 {
        avsync_common::time::duration_to_micros(self.epoch.elapsed())
    }

    /// Instant `delay_us` from now (negative delays mean now)
    pub fn deadline_after(&self, delay_us: i64) -> Instant {
        Instant::now() + avsync_common::time::micros_to_duration(delay_us)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}
