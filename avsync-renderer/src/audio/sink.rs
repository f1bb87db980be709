//! Audio sink abstraction consumed by the renderer
//!
//! All calls are made synchronously from the renderer task. A slow sink
//! stalls audio and video pacing equally.

use crate::error::Result;

/// Buffered PCM output device
///
/// Frame counters are monotonic for the lifetime of the sink (they are not
/// reset by pause/start).
pub trait AudioSink: Send {
    /// Start (or restart) playback of buffered frames
    fn start(&mut self) -> Result<()>;

    /// Pause playback, keeping buffered frames
    fn pause(&mut self) -> Result<()>;

    /// Write interleaved PCM bytes; returns how many bytes were accepted
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Frames played by the device so far
    fn position(&mut self) -> Result<u64>;

    /// Frames accepted by the device so far
    fn frames_written(&self) -> Result<u64>;

    /// Device buffer capacity in frames
    fn frame_count(&self) -> u64;

    /// Bytes per frame (all channels)
    fn frame_size(&self) -> usize;

    /// Duration of one frame in milliseconds
    fn msecs_per_frame(&self) -> f32;

    /// Reported device latency in milliseconds
    fn latency_ms(&self) -> u32;
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn pause(&mut self) -> Result<()> {
        (**self).pause()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        (**self).write(data)
    }

    fn position(&mut self) -> Result<u64> {
        (**self).position()
    }

    fn frames_written(&self) -> Result<u64> {
        (**self).frames_written()
    }

    fn frame_count(&self) -> u64 {
        (**self).frame_count()
    }

    fn frame_size(&self) -> usize {
        (**self).frame_size()
    }

    fn msecs_per_frame(&self) -> f32 {
        (**self).msecs_per_frame()
    }

    fn latency_ms(&self) -> u32 {
        (**self).latency_ms()
    }
}
