//! Renderer task - state, mailbox and run loop
//!
//! **Responsibilities:**
//! - RendererCore struct definition and initialization
//! - Run loop: handle commands from handles, fire self-posted timers
//! - Scheduling (deadline heap) and notification helpers
//!
//! All queue and anchor state is confined to the renderer task. Ingestion,
//! drain and control logic live in sibling modules as further
//! `impl RendererCore` blocks.

use super::anchor::AnchorClock;
use super::clock::MediaClock;
use super::diagnostics::RendererSnapshot;
use super::flags::SharedFlags;
use super::queue::{ConsumedSignal, MediaBuffer, StreamQueue};
use super::stats::SyncStats;
use crate::audio::AudioSink;
use crate::error::{Error, Result};
use avsync_common::config::RendererConfig;
use avsync_common::{ErrorSource, FinalResult, RendererEvent, StreamKind};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

/// Requests posted by `RendererHandle`
#[derive(Debug)]
pub(crate) enum Command {
    QueueBuffer {
        stream: StreamKind,
        buffer: MediaBuffer,
        consumed: ConsumedSignal,
    },
    QueueEos {
        stream: StreamKind,
        final_result: FinalResult,
    },
    Flush(StreamKind),
    Pause,
    Resume,
    /// Stall requested; the shared delay flag is already set
    StartDelay(i64),
    SignalDiscontinuity(oneshot::Sender<Result<()>>),
    RefreshAnchor {
        add_startup_latency: bool,
    },
    SeekPosition(i64),
    AudioSinkChanged,
    SetLiveStream(bool),
    SetMediaPresence {
        stream: StreamKind,
        present: bool,
    },
    Snapshot(oneshot::Sender<RendererSnapshot>),
    Shutdown,
}

/// Messages the renderer posts to itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SelfMessage {
    Drain { stream: StreamKind, generation: u64 },
    DelayExpired,
}

/// Self-posted message with its due time
///
/// Ordered by deadline, then by posting order so equal deadlines stay FIFO.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct Timer {
    deadline: Instant,
    seq: u64,
    message: SelfMessage,
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Renderer task state
pub(crate) struct RendererCore {
    pub(super) config: RendererConfig,

    /// Audio output device
    pub(super) sink: Box<dyn AudioSink>,

    pub(super) clock: MediaClock,

    /// Flushing flags and stall state shared with handles
    pub(super) flags: Arc<SharedFlags>,

    /// Notification channel towards the control layer
    pub(super) events_tx: mpsc::UnboundedSender<RendererEvent>,

    pub(super) audio_queue: StreamQueue,
    pub(super) video_queue: StreamQueue,

    pub(super) anchor: AnchorClock,

    /// Sink buffering compensation applied to the audio anchor
    pub(super) real_time_offset_us: i64,

    /// Frames handed to the sink (sink counter at construction / sink change)
    pub(super) frames_written: u64,

    /// Bumped on flush and pause; drains carrying an older value are stale
    pub(super) audio_generation: u64,
    pub(super) video_generation: u64,

    pub(super) drain_audio_pending: bool,
    pub(super) drain_video_pending: bool,

    /// Video drains wait until the next audio drain ran
    pub(super) video_waits_for_first_audio: bool,

    /// Aligning audio and video heads after a discontinuity
    pub(super) sync_queues: bool,

    pub(super) paused: bool,
    pub(super) was_paused: bool,

    pub(super) has_audio: bool,
    pub(super) has_video: bool,
    pub(super) is_live: bool,

    /// Timestamp of the last video sample taken off the queue
    pub(super) last_received_video_us: Option<i64>,
    pub(super) last_rendered_media_us: Option<i64>,

    pub(super) video_late_by_us: i64,

    /// Pins the reported position until the next discontinuity
    pub(super) seek_position_us: Option<i64>,
    pub(super) last_position_update_us: Option<i64>,

    pub(super) startup_latency_begin_us: Option<i64>,
    pub(super) startup_latency_us: Option<i64>,

    /// Next audio head is checked for early arrival after a live refresh
    pub(super) disc_from_refresh: bool,

    /// No video frame drained since the last discontinuity
    pub(super) first_video_since_disc: bool,

    pub(super) timers: BinaryHeap<Reverse<Timer>>,
    pub(super) next_timer_seq: u64,

    pub(super) stats: SyncStats,
}

impl RendererCore {
    pub(crate) fn new(
        config: RendererConfig,
        sink: Box<dyn AudioSink>,
        clock: MediaClock,
        flags: Arc<SharedFlags>,
        events_tx: mpsc::UnboundedSender<RendererEvent>,
    ) -> Self {
        let frames_written = sink.frames_written().unwrap_or(0);

        Self {
            config,
            sink,
            clock,
            flags,
            events_tx,
            audio_queue: StreamQueue::new(),
            video_queue: StreamQueue::new(),
            anchor: AnchorClock::new(),
            real_time_offset_us: 0,
            frames_written,
            audio_generation: 0,
            video_generation: 0,
            drain_audio_pending: false,
            drain_video_pending: false,
            video_waits_for_first_audio: false,
            sync_queues: false,
            paused: false,
            was_paused: false,
            has_audio: false,
            has_video: false,
            is_live: false,
            last_received_video_us: None,
            last_rendered_media_us: None,
            video_late_by_us: 0,
            seek_position_us: None,
            last_position_update_us: None,
            startup_latency_begin_us: None,
            startup_latency_us: None,
            disc_from_refresh: false,
            first_video_since_disc: true,
            timers: BinaryHeap::new(),
            next_timer_seq: 0,
            stats: SyncStats::new(),
        }
    }

    /// Process commands and timers until shutdown or until every handle is gone
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            "Renderer started (sync window {} us, position interval {} us)",
            self.config.sync_window_us, self.config.min_position_update_interval_us
        );

        if let Err(e) = self.sink.start() {
            self.report_sink_error("start", e);
        }

        loop {
            let next_deadline = self.timers.peek().map(|Reverse(timer)| timer.deadline);

            tokio::select! {
                biased;

                _ = wait_until(next_deadline) => {
                    self.fire_due_timers();
                }

                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }

        let released = self.audio_queue.flush() + self.video_queue.flush();
        info!(
            "Renderer stopped ({} pending samples released): {}",
            released,
            self.stats.summary()
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::QueueBuffer {
                stream,
                buffer,
                consumed,
            } => self.on_queue_buffer(stream, buffer, consumed),
            Command::QueueEos {
                stream,
                final_result,
            } => self.on_queue_eos(stream, final_result),
            Command::Flush(stream) => self.on_flush(stream),
            Command::Pause => self.on_pause(),
            Command::Resume => self.on_resume(),
            Command::StartDelay(delay_us) => self.begin_delay(delay_us),
            Command::SignalDiscontinuity(reply) => {
                let _ = reply.send(self.on_discontinuity());
            }
            Command::RefreshAnchor {
                add_startup_latency,
            } => self.refresh_anchor_real_time(add_startup_latency),
            Command::SeekPosition(position_us) => self.on_seek_position(position_us),
            Command::AudioSinkChanged => self.on_audio_sink_changed(),
            Command::SetLiveStream(live) => {
                debug!("Live stream set to {}", live);
                self.is_live = live;
            }
            Command::SetMediaPresence { stream, present } => {
                debug!("{} presence set to {}", stream, present);
                self.set_presence(stream, present);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    /// Run every timer whose deadline has passed, in deadline order
    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(timer)) = self.timers.peek() {
            if timer.deadline > now {
                break;
            }
            if let Some(Reverse(timer)) = self.timers.pop() {
                self.handle_self_message(timer.message);
            }
        }
    }

    fn handle_self_message(&mut self, message: SelfMessage) {
        match message {
            SelfMessage::Drain { stream, generation } => self.on_drain_due(stream, generation),
            SelfMessage::DelayExpired => self.on_delay_expired(),
        }
    }

    /// Post a message to ourselves `delay_us` from now
    pub(super) fn schedule(&mut self, delay_us: i64, message: SelfMessage) {
        let deadline = self.clock.deadline_after(delay_us);
        let seq = self.next_timer_seq;
        self.next_timer_seq += 1;

        trace!("Scheduled {:?} in {} us", message, delay_us.max(0));
        self.timers.push(Reverse(Timer {
            deadline,
            seq,
            message,
        }));
    }

    pub(super) fn queue(&self, stream: StreamKind) -> &StreamQueue {
        match stream {
            StreamKind::Audio => &self.audio_queue,
            StreamKind::Video => &self.video_queue,
        }
    }

    pub(super) fn queue_mut(&mut self, stream: StreamKind) -> &mut StreamQueue {
        match stream {
            StreamKind::Audio => &mut self.audio_queue,
            StreamKind::Video => &mut self.video_queue,
        }
    }

    pub(super) fn generation(&self, stream: StreamKind) -> u64 {
        match stream {
            StreamKind::Audio => self.audio_generation,
            StreamKind::Video => self.video_generation,
        }
    }

    /// Invalidate scheduled drains of a stream
    pub(super) fn invalidate_drains(&mut self, stream: StreamKind) {
        match stream {
            StreamKind::Audio => {
                self.drain_audio_pending = false;
                self.audio_generation += 1;
            }
            StreamKind::Video => {
                self.drain_video_pending = false;
                self.video_generation += 1;
            }
        }
    }

    pub(super) fn set_presence(&mut self, stream: StreamKind, present: bool) {
        match stream {
            StreamKind::Audio => self.has_audio = present,
            StreamKind::Video => self.has_video = present,
        }
    }

    pub(super) fn has_stream(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Audio => self.has_audio,
            StreamKind::Video => self.has_video,
        }
    }

    pub(super) fn emit(&self, event: RendererEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("Renderer event dropped: no receiver");
        }
    }

    pub(super) fn notify_eos(&self, stream: StreamKind, final_result: FinalResult) {
        info!("{} EOS reached ({})", stream, final_result);
        self.emit(RendererEvent::Eos {
            stream,
            final_result,
        });
    }

    /// Emit a position update, at most once per configured interval unless `is_eos`
    pub(super) fn notify_position(&mut self, is_eos: bool) {
        let now = self.clock.now_us();
        let Some(projected) = self.anchor.position_us(now) else {
            return;
        };

        if !is_eos {
            if let Some(last) = self.last_position_update_us {
                if now < last + self.config.min_position_update_interval_us {
                    return;
                }
            }
        }
        self.last_position_update_us = Some(now);

        self.emit(RendererEvent::Position {
            position_us: self.seek_position_us.unwrap_or(projected),
            video_late_by_us: self.video_late_by_us,
        });
    }

    pub(super) fn report_sink_error(&self, operation: &str, err: Error) {
        error!("Audio sink {} failed: {}", operation, err);
        self.emit(RendererEvent::Error {
            source: ErrorSource::Sink,
            message: format!("{} failed: {}", operation, err),
        });
    }

    pub(super) fn report_control_error(&self, err: &Error) {
        warn!("{}", err);
        self.emit(RendererEvent::Error {
            source: ErrorSource::Control,
            message: err.to_string(),
        });
    }

    /// Start the startup-latency measurement on the first buffer after a discontinuity
    pub(super) fn begin_startup_latency(&mut self) {
        if self.startup_latency_begin_us.is_none() {
            self.startup_latency_begin_us = Some(self.clock.now_us());
        }
    }

    /// Close the startup-latency measurement on the first drain
    pub(super) fn measure_startup_latency(&mut self) {
        if self.startup_latency_us.is_some() {
            return;
        }
        if let Some(begin) = self.startup_latency_begin_us {
            let latency = self.clock.now_us() - begin;
            debug!("Startup latency {} ms", latency / 1000);
            self.startup_latency_us = Some(latency);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
