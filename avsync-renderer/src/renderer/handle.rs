//! Renderer task spawn and the public handle

use super::clock::MediaClock;
use super::core::{Command, RendererCore};
use super::diagnostics::RendererSnapshot;
use super::flags::SharedFlags;
use super::queue::{ConsumedSignal, MediaBuffer};
use crate::audio::AudioSink;
use crate::error::{Error, Result};
use avsync_common::config::RendererConfig;
use avsync_common::{FinalResult, RendererEvent, StreamKind};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Running renderer task
pub struct Renderer {
    handle: RendererHandle,
    task: JoinHandle<()>,
}

impl Renderer {
    /// Validate the configuration and start the renderer task
    ///
    /// Must be called from within a tokio runtime. Notifications are sent on
    /// `events_tx`; a dropped receiver only silences them.
    pub fn spawn(
        config: RendererConfig,
        sink: Box<dyn AudioSink>,
        events_tx: mpsc::UnboundedSender<RendererEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let clock = MediaClock::new();
        let flags = Arc::new(SharedFlags::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let core = RendererCore::new(config, sink, clock, Arc::clone(&flags), events_tx);
        let task = tokio::spawn(core.run(rx));

        Ok(Self {
            handle: RendererHandle { tx, flags, clock },
            task,
        })
    }

    pub fn handle(&self) -> RendererHandle {
        self.handle.clone()
    }

    /// Stop the task and wait for it; queued buffers are released unrendered
    pub async fn shutdown(self) -> Result<()> {
        // Already-exited tasks are fine here
        let _ = self.handle.shutdown();
        self.task
            .await
            .map_err(|e| Error::InvalidState(format!("renderer task failed: {}", e)))
    }
}

/// Cloneable, non-blocking access to a renderer
#[derive(Clone)]
pub struct RendererHandle {
    tx: mpsc::UnboundedSender<Command>,
    flags: Arc<SharedFlags>,
    clock: MediaClock,
}

impl RendererHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::Closed)
    }

    /// Clock the renderer paces against
    pub fn clock(&self) -> MediaClock {
        self.clock
    }

    /// Queue a decoded sample
    ///
    /// `consumed` fires exactly once. If the renderer is gone it fires
    /// unrendered before this returns `Error::Closed`.
    pub fn queue_buffer(
        &self,
        stream: StreamKind,
        buffer: MediaBuffer,
        consumed: ConsumedSignal,
    ) -> Result<()> {
        self.send(Command::QueueBuffer {
            stream,
            buffer,
            consumed,
        })
    }

    /// Queue an end-of-stream marker; `FinalResult::Ok` is not a valid terminal status
    pub fn queue_eos(&self, stream: StreamKind, final_result: FinalResult) -> Result<()> {
        if final_result.is_ok() {
            return Err(Error::InvalidControl(format!(
                "{} EOS must carry a terminal status",
                stream
            )));
        }
        self.send(Command::QueueEos {
            stream,
            final_result,
        })
    }

    /// Drop everything queued for `stream`
    ///
    /// Buffers queued from now on are rejected until the flush completes
    /// (`RendererEvent::FlushComplete`).
    pub fn flush(&self, stream: StreamKind) -> Result<()> {
        self.flags.begin_flush(stream)?;
        debug!("Flush requested for {}", stream);

        self.send(Command::Flush(stream)).inspect_err(|_| {
            self.flags.end_flush(stream);
        })
    }

    /// Reset the clock for a new timeline; both queues must be empty
    pub async fn signal_discontinuity(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::SignalDiscontinuity(reply_tx))?;
        reply_rx.await.map_err(|_| Error::Closed)?
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Stall both drains and the audio sink for `delay_us`
    ///
    /// A request made while a stall is active does not stack: it is re-evaluated
    /// when the active stall ends, net of the time elapsed since it was made.
    pub fn queue_delay(&self, delay_us: i64) -> Result<()> {
        if delay_us <= 0 {
            warn!("Ignoring non-positive stall of {} us", delay_us);
            return Ok(());
        }

        if self.flags.request_delay(delay_us, self.clock.now_us()) {
            self.send(Command::StartDelay(delay_us))
        } else {
            info!(
                "Stall already in progress, {} ms cached for later",
                delay_us / 1000
            );
            Ok(())
        }
    }

    pub fn set_live_stream(&self, live: bool) -> Result<()> {
        self.send(Command::SetLiveStream(live))
    }

    pub fn set_media_presence(&self, stream: StreamKind, present: bool) -> Result<()> {
        self.send(Command::SetMediaPresence { stream, present })
    }

    /// Re-derive the anchor's wall-clock time from the last rendered media time
    pub fn signal_refresh_anchor_real_time(&self, add_startup_latency: bool) -> Result<()> {
        self.send(Command::RefreshAnchor {
            add_startup_latency,
        })
    }

    /// Report `position_us` immediately and until the next discontinuity
    pub fn notify_seek_position(&self, position_us: i64) -> Result<()> {
        self.send(Command::SeekPosition(position_us))
    }

    pub fn signal_audio_sink_changed(&self) -> Result<()> {
        self.send(Command::AudioSinkChanged)
    }

    pub async fn snapshot(&self) -> Result<RendererSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| Error::Closed)
    }

    /// Ask the renderer task to exit
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    pub fn is_flushing(&self, stream: StreamKind) -> bool {
        self.flags.is_flushing(stream)
    }

    pub fn is_delay_pending(&self) -> bool {
        self.flags.delay_pending()
    }
}
