//! Buffer and EOS ingestion, start gating and cross-queue synchronization

use super::core::RendererCore;
use super::queue::{ConsumedSignal, MediaBuffer};
use avsync_common::{FinalResult, StreamKind};
use tracing::{debug, info, trace, warn};

impl RendererCore {
    pub(super) fn on_queue_buffer(
        &mut self,
        stream: StreamKind,
        buffer: MediaBuffer,
        consumed: ConsumedSignal,
    ) {
        self.set_presence(stream, true);

        if self.flags.is_flushing(stream) {
            trace!(
                "Dropping {} sample at {} us while flushing",
                stream,
                buffer.time_us
            );
            consumed.fire(false);
            return;
        }

        self.begin_startup_latency();

        let time_us = buffer.time_us;
        if !self.queue_mut(stream).push_sample(buffer, consumed) {
            return;
        }

        // Hold both streams until each has something to anchor on
        if self.has_stream(stream.other()) && self.anchor.media_us().is_none() {
            if !stream.is_audio() && self.audio_queue.is_empty() {
                trace!(
                    "Holding video sample at {} us until the first audio sample arrives",
                    time_us
                );
                return;
            }
            if self.video_queue.len() < self.config.start_gate_min_video_frames {
                trace!(
                    "Holding {} sample at {} us until {} video frames are buffered",
                    stream,
                    time_us,
                    self.config.start_gate_min_video_frames
                );
                return;
            }

            self.start_anchor_and_drain();
            self.check_sync_queues();
            return;
        }

        match stream {
            StreamKind::Audio => self.post_drain_audio(0),
            StreamKind::Video => self.post_drain_video(),
        }

        self.check_sync_queues();
    }

    /// Anchor media time on the earlier head and start audio; video follows
    /// after the first audio drain
    fn start_anchor_and_drain(&mut self) {
        let audio_head = self.audio_queue.head_time_us();
        let video_head = self.video_queue.head_time_us();

        let start_us = match (audio_head, video_head) {
            (Some(audio), Some(video)) => Some(audio.min(video)),
            (audio, video) => audio.or(video),
        };

        if let Some(start_us) = start_us {
            info!(
                "Both streams buffered, starting at {} us (audio head {:?}, video head {:?})",
                start_us, audio_head, video_head
            );
            self.anchor.set_media(start_us);
        }

        self.video_waits_for_first_audio = true;
        self.post_drain_audio(0);
    }

    pub(super) fn on_queue_eos(&mut self, stream: StreamKind, final_result: FinalResult) {
        self.sync_queues_done();

        if self.flags.is_flushing(stream) {
            trace!("Dropping {} EOS while flushing", stream);
            return;
        }

        if !self.queue_mut(stream).push_eos(final_result) {
            warn!("{} EOS already queued, ignoring {}", stream, final_result);
            return;
        }
        debug!("{} EOS queued ({})", stream, final_result);

        match stream {
            StreamKind::Audio => self.post_drain_audio(0),
            StreamKind::Video => self.post_drain_video(),
        }
    }

    /// Drop leading audio until it is within the allowed lead over video
    pub(super) fn check_sync_queues(&mut self) {
        if !self.sync_queues || self.audio_queue.is_empty() || self.video_queue.is_empty() {
            return;
        }

        // EOS on either head ends the alignment
        let (Some(audio_us), Some(video_us)) = (
            self.audio_queue.head_time_us(),
            self.video_queue.head_time_us(),
        ) else {
            self.sync_queues_done();
            return;
        };

        let lead_us = video_us - audio_us;
        trace!("Queue head difference {} us", lead_us);

        if lead_us > self.config.sync_queues_max_lead_us {
            debug!(
                "Audio at {} us starts {} us before video, dropping it",
                audio_us, lead_us
            );
            self.audio_queue.drop_front();
            self.stats.record_audio_drop();
            return;
        }

        self.sync_queues_done();
    }

    pub(super) fn sync_queues_done(&mut self) {
        if !self.sync_queues {
            return;
        }
        self.sync_queues = false;
        debug!("Queue synchronization done");

        self.post_drain_audio(0);
        self.post_drain_video();
    }
}
