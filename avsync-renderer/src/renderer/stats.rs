//! Sync statistics
//!
//! Counters for late/on-time video, dropped audio and pauses. Logged at
//! shutdown and included in diagnostics snapshots.

use avsync_common::time::micros_to_secs;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Video frames rendered
    pub frames_on_time: u64,
    /// Video frames dropped for lateness
    pub frames_late: u64,
    /// Worst lateness seen on any drained video frame
    pub max_late_by_us: i64,
    /// Sum of positive lateness over dropped frames
    pub total_late_by_us: i64,
    /// Audio samples dropped (sync alignment or live catch-up)
    pub audio_samples_dropped: u64,
    pub pauses: u64,
    /// Media position at the most recent pause (None when no anchor existed)
    pub last_pause_position_us: Option<i64>,
    /// Anchor resets forced by very late video
    pub anchor_resets: u64,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_on_time(&mut self, late_by_us: i64) {
        self.frames_on_time += 1;
        self.max_late_by_us = self.max_late_by_us.max(late_by_us);
    }

    pub(crate) fn record_late(&mut self, late_by_us: i64) {
        self.frames_late += 1;
        self.max_late_by_us = self.max_late_by_us.max(late_by_us);
        self.total_late_by_us += late_by_us.max(0);
    }

    pub(crate) fn record_audio_drop(&mut self) {
        self.audio_samples_dropped += 1;
    }

    pub(crate) fn record_pause(&mut self, position_us: Option<i64>) {
        self.pauses += 1;
        self.last_pause_position_us = position_us;
    }

    pub(crate) fn record_anchor_reset(&mut self) {
        self.anchor_resets += 1;
    }

    pub fn total_frames(&self) -> u64 {
        self.frames_on_time + self.frames_late
    }

    /// Fraction of drained video frames that were dropped
    pub fn late_ratio(&self) -> f64 {
        match self.total_frames() {
            0 => 0.0,
            total => self.frames_late as f64 / total as f64,
        }
    }

    /// Average lateness of dropped frames
    pub fn avg_late_by_us(&self) -> i64 {
        match self.frames_late {
            0 => 0,
            late => self.total_late_by_us / late as i64,
        }
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        format!(
            "video frames: {} rendered, {} dropped ({:.1}%), max late {:.3}s, \
             avg drop late {:.3}s; \
             audio drops: {}; pauses: {}; anchor resets: {}",
            self.frames_on_time,
            self.frames_late,
            self.late_ratio() * 100.0,
            micros_to_secs(self.max_late_by_us),
            micros_to_secs(self.avg_late_by_us()),
            self.audio_samples_dropped,
            self.pauses,
            self.anchor_resets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_ratio_and_average() {
        let mut stats = SyncStats::new();
        assert_eq!(stats.late_ratio(), 0.0);
        assert_eq!(stats.avg_late_by_us(), 0);

        stats.record_on_time(-3_000);
        stats.record_on_time(10_000);
        stats.record_late(60_000);
        stats.record_late(100_000);

        assert_eq!(stats.total_frames(), 4);
        assert!((stats.late_ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.avg_late_by_us(), 80_000);
        assert_eq!(stats.max_late_by_us, 100_000);
    }

    #[test]
    fn test_pause_records_position() {
        let mut stats = SyncStats::new();
        stats.record_pause(None);
        stats.record_pause(Some(2_500_000));
        assert_eq!(stats.pauses, 2);
        assert_eq!(stats.last_pause_position_us, Some(2_500_000));
    }

    #[test]
    fn test_summary_mentions_counters() {
        let mut stats = SyncStats::new();
        stats.record_audio_drop();
        stats.record_anchor_reset();
        let summary = stats.summary();
        assert!(summary.contains("audio drops: 1"));
        assert!(summary.contains("anchor resets: 1"));
    }
}
