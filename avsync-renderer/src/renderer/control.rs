//! Flush / pause / resume state machine, stalls and timeline control

use super::core::{RendererCore, SelfMessage};
use crate::error::{Error, Result};
use avsync_common::time::micros_to_secs;
use avsync_common::{RendererEvent, StreamKind};
use tracing::{debug, info, trace};

impl RendererCore {
    pub(super) fn on_flush(&mut self, stream: StreamKind) {
        // A stream starved by alignment may never see its own discontinuity
        self.sync_queues_done();

        let released = self.queue_mut(stream).flush();
        self.flags.end_flush(stream);
        self.invalidate_drains(stream);

        info!(
            "{} flushed: {} samples released, generation now {}",
            stream,
            released,
            self.generation(stream)
        );
        self.emit(RendererEvent::FlushComplete { stream });
    }

    pub(super) fn on_pause(&mut self) {
        if self.paused {
            self.report_control_error(&Error::InvalidControl(
                "pause requested while already paused".to_string(),
            ));
            return;
        }

        self.invalidate_drains(StreamKind::Audio);
        self.invalidate_drains(StreamKind::Video);

        if self.has_audio {
            if let Err(e) = self.sink.pause() {
                self.report_sink_error("pause", e);
            }
        }

        debug!(
            "Paused with {} audio and {} video entries queued",
            self.audio_queue.len(),
            self.video_queue.len()
        );

        self.paused = true;
        self.was_paused = true;

        let position_us = self.anchor.position_us(self.clock.now_us());
        self.stats.record_pause(position_us);
    }

    pub(super) fn on_resume(&mut self) {
        if !self.paused {
            trace!("Resume ignored: not paused");
            return;
        }

        if self.has_audio && !self.flags.delay_pending() {
            if let Err(e) = self.sink.start() {
                self.report_sink_error("start", e);
            }
        }

        self.paused = false;
        debug!("Resumed");

        if self.is_live {
            self.refresh_anchor_real_time(false);
        }

        self.post_drain_audio(0);
        self.post_drain_video();
    }

    /// Stall both drains for `delay_us`; the shared delay flag is already set
    pub(super) fn begin_delay(&mut self, delay_us: i64) {
        if self.has_audio {
            if let Err(e) = self.sink.pause() {
                self.report_sink_error("pause", e);
            }
        }

        info!("Rendering stalled for {} ms", delay_us / 1000);
        self.schedule(delay_us, SelfMessage::DelayExpired);
    }

    pub(super) fn on_delay_expired(&mut self) {
        if let Some(remaining_us) = self.flags.finish_delay(self.clock.now_us()) {
            debug!(
                "Stall requested during the previous one, {} ms remain",
                remaining_us / 1000
            );
            self.begin_delay(remaining_us);
            return;
        }

        info!("Stall over, resuming rendering");
        if self.has_audio && !self.paused {
            if let Err(e) = self.sink.start() {
                self.report_sink_error("start", e);
            }
        }

        self.post_drain_audio(0);
        self.post_drain_video();
    }

    pub(super) fn on_discontinuity(&mut self) -> Result<()> {
        if !self.audio_queue.is_empty() || !self.video_queue.is_empty() {
            let err = Error::InvalidState(format!(
                "discontinuity with non-empty queues (audio {}, video {})",
                self.audio_queue.len(),
                self.video_queue.len()
            ));
            self.report_control_error(&err);
            return Err(err);
        }

        self.anchor.reset();
        self.real_time_offset_us = 0;
        self.was_paused = false;
        self.seek_position_us = None;
        self.sync_queues = self.has_audio && self.has_video;
        self.has_audio = false;
        self.has_video = false;
        self.last_received_video_us = None;
        self.video_waits_for_first_audio = false;
        self.startup_latency_begin_us = None;
        self.startup_latency_us = None;
        self.disc_from_refresh = false;
        self.first_video_since_disc = true;

        info!("Time discontinuity (sync queues: {})", self.sync_queues);
        Ok(())
    }

    /// Move the anchor's wall-clock half to now, keeping the last rendered media time
    pub(super) fn refresh_anchor_real_time(&mut self, add_startup_latency: bool) {
        let (Some(anchor_media_us), Some(old_real_us)) =
            (self.anchor.media_us(), self.anchor.real_us())
        else {
            return;
        };
        if !self.anchor.is_valid() {
            return;
        }

        let media_us = self.last_rendered_media_us.unwrap_or(anchor_media_us);
        let mut real_us = self.clock.now_us() + self.real_time_offset_us;
        if add_startup_latency {
            real_us += self.startup_latency_us.unwrap_or(0);
        }

        self.anchor.set(media_us, real_us);
        self.disc_from_refresh = true;

        debug!(
            "Anchor refreshed: media {:.3} s, real {:.3} s (was {:.3} s), offset {} us",
            micros_to_secs(media_us),
            micros_to_secs(real_us),
            micros_to_secs(old_real_us),
            self.real_time_offset_us
        );
    }

    pub(super) fn on_seek_position(&mut self, position_us: i64) {
        self.seek_position_us = Some(position_us);
        self.last_position_update_us = Some(self.clock.now_us());

        self.emit(RendererEvent::Position {
            position_us,
            video_late_by_us: self.video_late_by_us,
        });
    }

    pub(super) fn on_audio_sink_changed(&mut self) {
        self.frames_written = self.sink.frames_written().unwrap_or(0);
        debug!("Audio sink changed, {} frames written", self.frames_written);
    }
}
