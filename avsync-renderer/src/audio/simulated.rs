//! Clock-driven sink model
//!
//! Plays frames at the configured sample rate on the tokio clock, so tests
//! running with a paused clock see deterministic positions. Never plays more
//! frames than were written (underrun holds the position).

use crate::audio::sink::AudioSink;
use crate::error::{Error, Result};
use avsync_common::config::SinkConfig;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Bytes per sample (16-bit PCM)
const BYTES_PER_SAMPLE: usize = 2;

/// Shared observation/injection handle for a `SimulatedSink`
#[derive(Debug, Clone, Default)]
pub struct SinkProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    bytes_written: AtomicU64,
    write_calls: AtomicU64,
    starts: AtomicU64,
    pauses: AtomicU64,
    playing: AtomicBool,
    fail_position: AtomicBool,
    fail_write: AtomicBool,
}

impl SinkProbe {
    /// Total bytes accepted by the sink
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::SeqCst)
    }

    /// Number of write calls that accepted data
    pub fn write_calls(&self) -> u64 {
        self.inner.write_calls.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> u64 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> u64 {
        self.inner.pauses.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::SeqCst)
    }

    /// Make subsequent position queries fail
    pub fn inject_position_failure(&self, fail: bool) {
        self.inner.fail_position.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail
    pub fn inject_write_failure(&self, fail: bool) {
        self.inner.fail_write.store(fail, Ordering::SeqCst);
    }
}

/// Simulated PCM output device
pub struct SimulatedSink {
    sample_rate: u32,
    frame_size: usize,
    buffer_frames: u64,
    latency_ms: u32,
    frames_written: u64,
    /// Frames played as of `playing_since` (or total when paused)
    played_base: u64,
    playing_since: Option<Instant>,
    probe: SinkProbe,
}

impl SimulatedSink {
    pub fn new(config: &SinkConfig) -> Self {
        debug!(
            "Simulated sink: {} Hz, {} channels, {} frames buffer, {} ms latency",
            config.sample_rate, config.channels, config.buffer_frames, config.latency_ms
        );

        Self {
            sample_rate: config.sample_rate.max(1),
            frame_size: config.channels.max(1) as usize * BYTES_PER_SAMPLE,
            buffer_frames: config.buffer_frames as u64,
            latency_ms: config.latency_ms,
            frames_written: 0,
            played_base: 0,
            playing_since: None,
            probe: SinkProbe::default(),
        }
    }

    /// Observation handle that stays valid after the sink moves into the renderer
    pub fn probe(&self) -> SinkProbe {
        self.probe.clone()
    }

    /// Bring `played_base` up to date with the clock
    fn advance(&mut self) -> u64 {
        if let Some(since) = self.playing_since {
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(since);
            let frames = (elapsed.as_secs_f64() * self.sample_rate as f64) as u64;
            let played = self.played_base + frames;

            if played >= self.frames_written {
                // Underrun: device idles until more data arrives
                if played > self.frames_written {
                    trace!("Simulated sink underrun at frame {}", self.frames_written);
                }
                self.played_base = self.frames_written;
                self.playing_since = Some(now);
            }
            self.played_base.max(played.min(self.frames_written))
        } else {
            self.played_base
        }
    }
}

impl AudioSink for SimulatedSink {
    fn start(&mut self) -> Result<()> {
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
            self.probe.inner.starts.fetch_add(1, Ordering::SeqCst);
            self.probe.inner.playing.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if self.playing_since.is_some() {
            self.played_base = self.advance();
            self.playing_since = None;
            self.probe.inner.pauses.fetch_add(1, Ordering::SeqCst);
            self.probe.inner.playing.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.probe.inner.fail_write.load(Ordering::SeqCst) {
            return Err(Error::Sink("injected write failure".to_string()));
        }

        let played = self.advance();
        let pending = self.frames_written - played;
        let room_frames = self.buffer_frames.saturating_sub(pending);
        let frames = (data.len() / self.frame_size) as u64;
        let accepted_frames = frames.min(room_frames);
        let accepted = accepted_frames as usize * self.frame_size;

        if accepted > 0 {
            // Restart the play clock at the point new data lands after an underrun
            if self.playing_since.is_some() && pending == 0 {
                self.played_base = played;
                self.playing_since = Some(Instant::now());
            }
            self.frames_written += accepted_frames;
            self.probe
                .inner
                .bytes_written
                .fetch_add(accepted as u64, Ordering::SeqCst);
            self.probe.inner.write_calls.fetch_add(1, Ordering::SeqCst);
        }

        Ok(accepted)
    }

    fn position(&mut self) -> Result<u64> {
        if self.probe.inner.fail_position.load(Ordering::SeqCst) {
            return Err(Error::Sink("injected position failure".to_string()));
        }
        Ok(self.advance())
    }

    fn frames_written(&self) -> Result<u64> {
        Ok(self.frames_written)
    }

    fn frame_count(&self) -> u64 {
        self.buffer_frames
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn msecs_per_frame(&self) -> f32 {
        1000.0 / self.sample_rate as f32
    }

    fn latency_ms(&self) -> u32 {
        self.latency_ms
    }
}
