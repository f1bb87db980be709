//! Test helpers for avsync-renderer integration tests
//!
//! Provides:
//! - TestRenderer: renderer on a simulated sink, with its event receiver
//! - ConsumedLog: records consumption callbacks in firing order
//! - TimedLog: also records the renderer clock time of each callback
//! - Buffer builders sized for the test sink (1 kHz mono, 1 frame = 1 ms)

#![allow(dead_code)]

use avsync_common::config::{RendererConfig, SinkConfig};
use avsync_common::RendererEvent;
use avsync_renderer::audio::{SimulatedSink, SinkProbe};
use avsync_renderer::renderer::MediaClock;
use avsync_renderer::{ConsumedSignal, MediaBuffer, Renderer, RendererHandle, RendererSnapshot};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Bytes per frame of the test sink (mono, 16-bit)
pub const FRAME_BYTES: usize = 2;

/// 1 kHz mono, 100 frame (100 ms) buffer, 40 ms latency
pub fn test_sink_config() -> SinkConfig {
    SinkConfig {
        sample_rate: 1_000,
        channels: 1,
        buffer_frames: 100,
        latency_ms: 40,
    }
}

/// Audio buffer of `frames` frames (one per millisecond)
pub fn audio_buffer(frames: usize, time_us: i64) -> MediaBuffer {
    MediaBuffer::new(vec![0u8; frames * FRAME_BYTES], time_us)
}

pub fn video_frame(time_us: i64) -> MediaBuffer {
    MediaBuffer::new(vec![0xAB; 16], time_us)
}

/// Renderer under test
pub struct TestRenderer {
    pub renderer: Renderer,
    pub handle: RendererHandle,
    pub events: mpsc::UnboundedReceiver<RendererEvent>,
    pub probe: SinkProbe,
}

impl TestRenderer {
    pub fn start() -> Self {
        Self::with_config(RendererConfig::default(), test_sink_config())
    }

    pub fn with_config(config: RendererConfig, sink_config: SinkConfig) -> Self {
        let sink = SimulatedSink::new(&sink_config);
        let probe = sink.probe();
        let (events_tx, events) = mpsc::unbounded_channel();

        let renderer =
            Renderer::spawn(config, Box::new(sink), events_tx).expect("renderer should start");
        let handle = renderer.handle();

        Self {
            renderer,
            handle,
            events,
            probe,
        }
    }

    /// Round trip through the mailbox: every earlier command has been handled
    pub async fn snapshot(&self) -> RendererSnapshot {
        self.handle.snapshot().await.expect("renderer alive")
    }

    /// Events received so far
    pub fn take_events(&mut self) -> Vec<RendererEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event matching `pred`, skipping others
    pub async fn wait_for_event<F>(&mut self, pred: F) -> RendererEvent
    where
        F: Fn(&RendererEvent) -> bool,
    {
        loop {
            let event = self.events.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    }
}

/// Consumption callbacks in the order they fired
#[derive(Clone, Default)]
pub struct ConsumedLog {
    entries: Arc<Mutex<Vec<(u32, bool)>>>,
}

impl ConsumedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self, id: u32) -> ConsumedSignal {
        let entries = Arc::clone(&self.entries);
        ConsumedSignal::new(move |consumed| {
            entries.lock().unwrap().push((id, consumed.rendered));
        })
    }

    pub fn entries(&self) -> Vec<(u32, bool)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.entries().into_iter().map(|(id, _)| id).collect()
    }

    pub fn rendered(&self, id: u32) -> Option<bool> {
        self.entries()
            .into_iter()
            .find(|(i, _)| *i == id)
            .map(|(_, rendered)| rendered)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Consumption callbacks as (media time, renderer clock time, rendered)
#[derive(Clone)]
pub struct TimedLog {
    clock: MediaClock,
    entries: Arc<Mutex<Vec<(i64, i64, bool)>>>,
}

impl TimedLog {
    pub fn new(clock: MediaClock) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn signal(&self, media_us: i64) -> ConsumedSignal {
        let entries = Arc::clone(&self.entries);
        let clock = self.clock;
        ConsumedSignal::new(move |consumed| {
            entries
                .lock()
                .unwrap()
                .push((media_us, clock.now_us(), consumed.rendered));
        })
    }

    pub fn entries(&self) -> Vec<(i64, i64, bool)> {
        self.entries.lock().unwrap().clone()
    }
}
