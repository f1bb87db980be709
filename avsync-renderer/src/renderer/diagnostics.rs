//! Diagnostics snapshot of the renderer state

use super::core::RendererCore;
use super::stats::SyncStats;
use avsync_common::StreamKind;
use serde::Serialize;

/// Point-in-time view of the renderer, for monitoring and tests
#[derive(Debug, Clone, Serialize)]
pub struct RendererSnapshot {
    pub audio_queue_len: usize,
    pub video_queue_len: usize,
    pub audio_generation: u64,
    pub video_generation: u64,
    pub drain_audio_pending: bool,
    pub drain_video_pending: bool,
    pub anchor_media_us: Option<i64>,
    pub anchor_real_us: Option<i64>,
    pub real_time_offset_us: i64,
    pub frames_written: u64,
    pub has_audio: bool,
    pub has_video: bool,
    pub is_live: bool,
    pub paused: bool,
    pub sync_queues: bool,
    pub delay_pending: bool,
    /// Stall requested during the active one, awaiting re-evaluation
    pub cached_delay_us: i64,
    pub video_waits_for_first_audio: bool,
    pub last_rendered_media_us: Option<i64>,
    pub video_late_by_us: i64,
    pub startup_latency_us: Option<i64>,
    /// Media position projected from the anchor at snapshot time
    pub position_us: Option<i64>,
    pub stats: SyncStats,
}

impl RendererSnapshot {
    pub fn queue_len(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Audio => self.audio_queue_len,
            StreamKind::Video => self.video_queue_len,
        }
    }

    pub fn generation(&self, stream: StreamKind) -> u64 {
        match stream {
            StreamKind::Audio => self.audio_generation,
            StreamKind::Video => self.video_generation,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

impl RendererCore {
    pub(super) fn snapshot(&self) -> RendererSnapshot {
        let delay = self.flags.delay_snapshot();

        RendererSnapshot {
            audio_queue_len: self.queue(StreamKind::Audio).len(),
            video_queue_len: self.queue(StreamKind::Video).len(),
            audio_generation: self.audio_generation,
            video_generation: self.video_generation,
            drain_audio_pending: self.drain_audio_pending,
            drain_video_pending: self.drain_video_pending,
            anchor_media_us: self.anchor.media_us(),
            anchor_real_us: self.anchor.real_us(),
            real_time_offset_us: self.real_time_offset_us,
            frames_written: self.frames_written,
            has_audio: self.has_audio,
            has_video: self.has_video,
            is_live: self.is_live,
            paused: self.paused,
            sync_queues: self.sync_queues,
            delay_pending: delay.pending,
            cached_delay_us: delay.queued_us,
            video_waits_for_first_audio: self.video_waits_for_first_audio,
            last_rendered_media_us: self.last_rendered_media_us,
            video_late_by_us: self.video_late_by_us,
            startup_latency_us: self.startup_latency_us,
            position_us: self
                .seek_position_us
                .or_else(|| self.anchor.position_us(self.clock.now_us())),
            stats: self.stats.clone(),
        }
    }
}
