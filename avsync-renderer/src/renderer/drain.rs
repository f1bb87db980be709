//! Drain scheduler - audio sink writes and video render/drop decisions
//!
//! **Responsibilities:**
//! - Posting drains (one pending drain per stream, tagged with its generation)
//! - Audio drain: fill the sink, re-derive the anchor from each new head sample
//! - Video drain: lateness check against the anchor, render or drop
//!
//! A drain whose generation no longer matches was overtaken by a flush or
//! pause and is discarded.

use super::core::{RendererCore, SelfMessage};
use super::queue::QueueEntry;
use avsync_common::time::micros_to_secs;
use avsync_common::StreamKind;
use tracing::{debug, trace, warn};

/// Floor for audio re-post delays while polling
const MIN_AUDIO_POLL_US: i64 = 5_000;

/// Result of one audio drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DrainOutcome {
    /// Queue empty, EOS reached, stalled, or sink failure
    Idle,
    /// Samples remain; sink is full
    Again,
    /// Live audio waits for video to anchor the clock
    Deferred,
    /// Early live sample held for the given time
    Hold(i64),
}

impl RendererCore {
    pub(super) fn post_drain_audio(&mut self, delay_us: i64) {
        if self.flags.delay_pending()
            || self.drain_audio_pending
            || self.sync_queues
            || self.paused
            || self.audio_queue.is_empty()
        {
            return;
        }

        self.drain_audio_pending = true;
        let generation = self.audio_generation;
        self.schedule(
            delay_us,
            SelfMessage::Drain {
                stream: StreamKind::Audio,
                generation,
            },
        );
    }

    pub(super) fn post_drain_video(&mut self) {
        if self.flags.delay_pending()
            || self.drain_video_pending
            || self.sync_queues
            || self.paused
            || self.video_waits_for_first_audio
        {
            return;
        }

        let Some(head) = self.video_queue.front() else {
            return;
        };

        let delay_us = match head.time_us() {
            // EOS carries no timestamp
            None => 0,
            Some(time_us) => {
                let now = self.clock.now_us();

                if !self.anchor.is_valid() {
                    debug!("Anchoring on video sample at {} us", time_us);
                    self.anchor.set(time_us, now);
                    0
                } else {
                    if self.was_paused {
                        self.was_paused = false;
                        if !self.has_audio {
                            self.anchor.set(time_us, now);
                        } else if !self.audio_queue.is_empty() {
                            trace!("Video after resume waits for the first audio drain");
                            self.video_waits_for_first_audio = true;
                            return;
                        }
                    }

                    let delay_us = self.anchor.deadline_us(time_us).unwrap_or(now) - now;
                    if delay_us > 0 {
                        trace!("Video early by {:.3} s", micros_to_secs(delay_us));
                    }
                    delay_us
                }
            }
        };

        self.drain_video_pending = true;
        let generation = self.video_generation;
        self.schedule(
            delay_us,
            SelfMessage::Drain {
                stream: StreamKind::Video,
                generation,
            },
        );
    }

    pub(super) fn on_drain_due(&mut self, stream: StreamKind, generation: u64) {
        // The pending flag of a stale drain belongs to its replacement
        if generation != self.generation(stream) {
            trace!(
                "Stale {} drain (generation {}, current {})",
                stream,
                generation,
                self.generation(stream)
            );
            return;
        }

        match stream {
            StreamKind::Audio => {
                self.drain_audio_pending = false;
                let outcome = self.drain_audio_queue();

                if self.video_waits_for_first_audio {
                    self.video_waits_for_first_audio = false;
                    self.post_drain_video();
                }

                match outcome {
                    DrainOutcome::Again | DrainOutcome::Deferred => {
                        // Refill after about half of what the sink can still play
                        if let Some(playout_us) = self.pending_playout_us() {
                            self.post_drain_audio((playout_us / 2).max(MIN_AUDIO_POLL_US));
                        }
                    }
                    DrainOutcome::Hold(delay_us) => self.post_drain_audio(delay_us),
                    DrainOutcome::Idle => {}
                }
            }
            StreamKind::Video => {
                self.drain_video_pending = false;
                self.drain_video_queue();
                self.post_drain_video();
            }
        }
    }

    /// Time the sink can keep playing from frames already written
    fn pending_playout_us(&mut self) -> Option<i64> {
        match self.sink.position() {
            Ok(played) => {
                let pending = self.frames_written.saturating_sub(played);
                Some((self.sink.msecs_per_frame() as f64 * pending as f64 * 1000.0) as i64)
            }
            Err(e) => {
                self.report_sink_error("position", e);
                None
            }
        }
    }

    pub(super) fn drain_audio_queue(&mut self) -> DrainOutcome {
        if self.flags.delay_pending() {
            return DrainOutcome::Idle;
        }

        self.measure_startup_latency();

        if self.audio_queue.len() == 1 && self.audio_queue.front().is_some_and(QueueEntry::is_eos) {
            self.finish_eos(StreamKind::Audio);
            return DrainOutcome::Idle;
        }

        let played = match self.sink.position() {
            Ok(played) => played,
            Err(e) => {
                self.report_sink_error("position", e);
                return DrainOutcome::Idle;
            }
        };

        let frame_size = self.sink.frame_size().max(1);
        let pending_frames = self.frames_written.saturating_sub(played);
        let mut writable =
            self.sink.frame_count().saturating_sub(pending_frames) as usize * frame_size;

        while writable > 0 {
            let (time_us, offset, discontinuity) = match self.audio_queue.front() {
                None => break,
                Some(QueueEntry::Eos { .. }) => {
                    self.finish_eos(StreamKind::Audio);
                    return DrainOutcome::Idle;
                }
                Some(QueueEntry::Sample { buffer, offset, .. }) => {
                    (buffer.time_us, *offset, buffer.discontinuity)
                }
            };

            if offset == 0 {
                if self.is_live && self.has_video {
                    // Let video anchor the live clock first
                    if self.anchor.real_us().is_none() && self.anchor.media_us() != Some(time_us) {
                        return DrainOutcome::Deferred;
                    }

                    if let Some(last_video_us) = self.last_received_video_us {
                        if time_us < last_video_us {
                            warn!(
                                "Dropping late audio at {:.3} s, last received video at {:.3} s",
                                micros_to_secs(time_us),
                                micros_to_secs(last_video_us)
                            );
                            self.audio_queue.drop_front();
                            self.stats.record_audio_drop();
                            continue;
                        }
                    }

                    if let Some(delay_us) = self.early_live_sample(time_us, discontinuity) {
                        return DrainOutcome::Hold(delay_us);
                    }
                }

                if !self.anchor_on_audio(time_us) {
                    return DrainOutcome::Idle;
                }
            }

            // Partial writes advance the offset; the entry completes once a
            // remainder shorter than one frame is left
            let mut write_error = None;
            let mut complete = false;
            let mut written = 0;

            if let Some(QueueEntry::Sample { buffer, offset, .. }) = self.audio_queue.front_mut() {
                let end = buffer.data.len().min(*offset + writable);
                let chunk = &buffer.data[*offset..end];

                if !chunk.is_empty() {
                    match self.sink.write(chunk) {
                        Ok(n) => written = n.min(chunk.len()),
                        Err(e) => write_error = Some(e),
                    }
                }

                *offset += written;
                complete = buffer.data.len() - *offset < frame_size;
            }

            if let Some(e) = write_error {
                self.report_sink_error("write", e);
                return DrainOutcome::Idle;
            }

            writable = writable.saturating_sub(written);
            self.frames_written += (written / frame_size) as u64;

            if complete {
                if let Some(QueueEntry::Sample { consumed, .. }) = self.audio_queue.pop_front() {
                    consumed.fire(true);
                }
            } else if written == 0 {
                break;
            }
        }

        self.notify_position(false);

        if self.audio_queue.is_empty() {
            DrainOutcome::Idle
        } else {
            DrainOutcome::Again
        }
    }

    /// Hold an early live sample flagged as discontinuous (or the first after
    /// a live refresh) until its deadline; returns the hold time
    fn early_live_sample(&mut self, time_us: i64, discontinuity: bool) -> Option<i64> {
        if !(self.disc_from_refresh || discontinuity) {
            return None;
        }
        let (Some(anchor_media), Some(anchor_real)) =
            (self.anchor.media_us(), self.anchor.real_us())
        else {
            return None;
        };
        if anchor_media <= 0 || anchor_real <= 0 {
            return None;
        }

        let real_time_us = time_us - anchor_media + anchor_real;
        let half_latency_us = self.sink.latency_ms() as i64 * 1000 / 2;
        let delay_us = real_time_us - self.clock.now_us() - half_latency_us;

        debug!(
            "Early check for audio at {:.3} s: deadline {:.3} s, delay {:.3} s",
            micros_to_secs(time_us),
            micros_to_secs(real_time_us),
            micros_to_secs(delay_us)
        );

        self.disc_from_refresh = false;
        if delay_us <= 0 {
            return None;
        }

        if let Some(QueueEntry::Sample { buffer, .. }) = self.audio_queue.front_mut() {
            buffer.discontinuity = false;
        }
        self.anchor.set(time_us, real_time_us);
        Some(delay_us)
    }

    /// Re-derive the anchor from an audio sample about to be written
    fn anchor_on_audio(&mut self, time_us: i64) -> bool {
        let played = match self.sink.position() {
            Ok(played) => played,
            Err(e) => {
                self.report_sink_error("position", e);
                return false;
            }
        };
        let pending_frames = self.frames_written.saturating_sub(played);

        self.real_time_offset_us = ((self.sink.latency_ms() as f64 / 2.0
            + pending_frames as f64 * self.sink.msecs_per_frame() as f64)
            * 1000.0) as i64;

        let real_us = self.clock.now_us() + self.real_time_offset_us;
        self.anchor.set(time_us, real_us);
        self.last_rendered_media_us = Some(time_us);

        trace!(
            "Rendering audio at {:.3} s (anchor real {} us, offset {} us)",
            micros_to_secs(time_us),
            real_us,
            self.real_time_offset_us
        );
        true
    }

    pub(super) fn drain_video_queue(&mut self) {
        if self.flags.delay_pending() {
            return;
        }

        self.measure_startup_latency();

        let time_us = match self.video_queue.front() {
            None => return,
            Some(QueueEntry::Eos { .. }) => {
                self.notify_position(true);
                self.finish_eos(StreamKind::Video);
                self.video_late_by_us = 0;
                return;
            }
            Some(QueueEntry::Sample { buffer, .. }) => buffer.time_us,
        };

        self.last_received_video_us = Some(time_us);

        let now = self.clock.now_us();
        if !self.anchor.is_valid() {
            self.anchor.set(time_us, now);
        }
        let deadline_us = self.anchor.deadline_us(time_us).unwrap_or(now);
        self.video_late_by_us = now - deadline_us;

        let mut too_late = self.video_late_by_us > self.config.sync_window_us;
        let leads_anchor = self.anchor.media_us().is_some_and(|media| time_us > media);

        if too_late && (self.first_video_since_disc || !self.has_audio || leads_anchor) {
            debug!(
                "Video at {:.3} s late by {} us, resetting anchor",
                micros_to_secs(time_us),
                self.video_late_by_us
            );
            self.anchor.set(time_us, now);
            self.stats.record_anchor_reset();
            too_late = false;
        }
        self.first_video_since_disc = false;

        if too_late {
            warn!(
                "Video late by {} us ({:.2} s), dropping frame at {:.3} s",
                self.video_late_by_us,
                micros_to_secs(self.video_late_by_us),
                micros_to_secs(time_us)
            );
            self.stats.record_late(self.video_late_by_us);
        } else {
            trace!("Rendering video at {:.3} s", micros_to_secs(time_us));
            self.stats.record_on_time(self.video_late_by_us);
            self.last_rendered_media_us = Some(time_us);
            self.real_time_offset_us = 0;
        }

        if let Some(QueueEntry::Sample { consumed, .. }) = self.video_queue.pop_front() {
            consumed.fire(!too_late);
        }

        self.notify_position(false);
    }

    fn finish_eos(&mut self, stream: StreamKind) {
        if let Some(QueueEntry::Eos { final_result }) = self.queue_mut(stream).pop_front() {
            self.notify_eos(stream, final_result);
        }
    }
}
