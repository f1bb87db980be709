//! AV sync renderer (avsync-renderer) - Main entry point
//!
//! Runs a synthetic audio/video session through the renderer: a tone
//! generator and a frame generator act as decoders, the audio goes to a
//! simulated sink (or a real device with the `cpal-output` feature), and
//! renderer notifications are logged as JSON.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use avsync_common::config::{ConfigResolver, SessionConfig, SinkConfig, TomlConfig};
use avsync_common::{FinalResult, RendererEvent, StreamKind};
use avsync_renderer::audio::{AudioSink, SimulatedSink};
use avsync_renderer::{ConsumedSignal, MediaBuffer, Renderer, RendererHandle};
use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Audio buffers a producer keeps outstanding before waiting for one to return
const MAX_AUDIO_IN_FLIGHT: usize = 8;

/// Video frames a producer keeps outstanding before waiting for one to return
const MAX_VIDEO_IN_FLIGHT: usize = 4;

const TONE_HZ: f32 = 440.0;

/// Command-line arguments for avsync-renderer
#[derive(Parser, Debug)]
#[command(name = "avsync-renderer")]
#[command(about = "Synthetic A/V session through the sync renderer")]
#[command(version)]
struct Args {
    /// Config file (overrides AVSYNC_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session length in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Treat the session as live content
    #[arg(long)]
    live: bool,

    /// Stall rendering for this many milliseconds halfway through
    #[arg(long, default_value = "0")]
    stall_ms: u64,

    /// Log filter (overrides the config file; RUST_LOG overrides both)
    #[arg(long, env = "AVSYNC_LOG")]
    log_level: Option<String>,

    /// Output device name ("default" for the system default)
    #[cfg(feature = "cpal-output")]
    #[arg(long)]
    device: Option<String>,

    /// Print the built-in default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        let text = toml::to_string_pretty(&TomlConfig::default())
            .context("Failed to serialize default configuration")?;
        println!("{}", text);
        return Ok(());
    }

    let config_path = ConfigResolver::new("renderer").resolve(args.config.as_deref());
    let mut config = TomlConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }
    if let Some(duration) = args.duration {
        config.session.duration_secs = duration;
    }
    config.session.live |= args.live;

    info!(
        "Starting session: {} s, {} fps video, {} ms audio chunks, live={}",
        config.session.duration_secs,
        config.session.video_fps,
        config.session.audio_chunk_ms,
        config.session.live
    );

    let sink = open_sink(&args, &config.sink)?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let renderer = Renderer::spawn(config.renderer.clone(), sink, events_tx)
        .context("Failed to start renderer")?;
    let handle = renderer.handle();

    handle.set_live_stream(config.session.live)?;
    handle.set_media_presence(StreamKind::Audio, true)?;
    handle.set_media_presence(StreamKind::Video, true)?;

    let audio_task = tokio::spawn(produce_audio(
        handle.clone(),
        config.session.clone(),
        config.sink.clone(),
    ));
    let video_task = tokio::spawn(produce_video(handle.clone(), config.session.clone()));

    if args.stall_ms > 0 {
        let stall_handle = handle.clone();
        let at = Duration::from_secs(config.session.duration_secs) / 2;
        let stall_us = args.stall_ms as i64 * 1000;
        tokio::spawn(async move {
            tokio::time::sleep(at).await;
            if let Err(e) = stall_handle.queue_delay(stall_us) {
                warn!("Stall request failed: {}", e);
            }
        });
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut eos_streams = 0;

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(event) => {
                    log_event(&event);
                    if matches!(event, RendererEvent::Eos { .. }) {
                        eos_streams += 1;
                        if eos_streams == 2 {
                            info!("Both streams reached EOS");
                            break;
                        }
                    }
                }
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    let snapshot = handle
        .snapshot()
        .await
        .context("Failed to read renderer state")?;
    info!("Final renderer state: {}", snapshot.to_json());
    info!("Sync: {}", snapshot.stats.summary());

    renderer.shutdown().await.context("Renderer shutdown failed")?;
    audio_task.abort();
    video_task.abort();

    info!("Session complete");
    Ok(())
}

#[cfg(feature = "cpal-output")]
fn open_sink(args: &Args, sink: &SinkConfig) -> Result<Box<dyn AudioSink>> {
    use avsync_renderer::audio::CpalSink;

    match &args.device {
        Some(name) => {
            let device = (name != "default").then(|| name.clone());
            let output = CpalSink::open(device, sink).context("Failed to open audio device")?;
            Ok(Box::new(output))
        }
        None => Ok(Box::new(SimulatedSink::new(sink))),
    }
}

#[cfg(not(feature = "cpal-output"))]
fn open_sink(_args: &Args, sink: &SinkConfig) -> Result<Box<dyn AudioSink>> {
    Ok(Box::new(SimulatedSink::new(sink)))
}

fn log_event(event: &RendererEvent) {
    match event {
        RendererEvent::Position { .. } => debug!("{}", event.to_json()),
        RendererEvent::Error { .. } => warn!("{}", event.to_json()),
        _ => info!("{}", event.to_json()),
    }
}

/// Sine tone source standing in for an audio decoder
struct ToneGenerator {
    phase: f32,
    step: f32,
    channels: usize,
}

impl ToneGenerator {
    fn new(frequency: f32, sample_rate: u32, channels: u16) -> Self {
        Self {
            phase: 0.0,
            step: frequency * std::f32::consts::TAU / sample_rate.max(1) as f32,
            channels: channels.max(1) as usize,
        }
    }

    /// `frames` frames of interleaved 16-bit little-endian PCM
    fn next_chunk(&mut self, frames: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(frames * self.channels * 2);
        for _ in 0..frames {
            let sample = (self.phase.sin() * i16::MAX as f32 * 0.25) as i16;
            for _ in 0..self.channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
        data
    }
}

async fn produce_audio(
    handle: RendererHandle,
    session: SessionConfig,
    sink: SinkConfig,
) -> avsync_renderer::Result<()> {
    let sample_rate = sink.sample_rate.max(1) as i64;
    let frames = (sample_rate * session.audio_chunk_ms as i64 / 1000).max(1);
    let chunk_us = frames * 1_000_000 / sample_rate;
    let end_us = session.duration_secs as i64 * 1_000_000;

    let mut tone = ToneGenerator::new(TONE_HZ, sink.sample_rate, sink.channels);
    let mut in_flight: VecDeque<oneshot::Receiver<_>> = VecDeque::new();
    let mut time_us = 0;

    while time_us < end_us {
        if in_flight.len() >= MAX_AUDIO_IN_FLIGHT {
            if let Some(rx) = in_flight.pop_front() {
                let _ = rx.await;
            }
        }

        let (consumed, rx) = ConsumedSignal::channel();
        let buffer = MediaBuffer::new(tone.next_chunk(frames as usize), time_us);
        handle.queue_buffer(StreamKind::Audio, buffer, consumed)?;
        in_flight.push_back(rx);
        time_us += chunk_us;
    }

    debug!("Audio producer finished at {} us", time_us);
    handle.queue_eos(StreamKind::Audio, FinalResult::EndOfStream)
}

async fn produce_video(
    handle: RendererHandle,
    session: SessionConfig,
) -> avsync_renderer::Result<()> {
    let frame_us = 1_000_000 / session.video_fps.max(1) as i64;
    let end_us = session.duration_secs as i64 * 1_000_000;

    let mut in_flight: VecDeque<oneshot::Receiver<avsync_renderer::Consumed>> = VecDeque::new();
    let mut rendered = 0u64;
    let mut dropped = 0u64;
    let mut time_us = 0;
    let mut frame_index = 0u32;

    while time_us < end_us {
        if in_flight.len() >= MAX_VIDEO_IN_FLIGHT {
            if let Some(rx) = in_flight.pop_front() {
                match rx.await {
                    Ok(c) if c.rendered => rendered += 1,
                    _ => dropped += 1,
                }
            }
        }

        let (consumed, rx) = ConsumedSignal::channel();
        let buffer = MediaBuffer::new(frame_index.to_le_bytes().to_vec(), time_us);
        handle.queue_buffer(StreamKind::Video, buffer, consumed)?;
        in_flight.push_back(rx);

        time_us += frame_us;
        frame_index += 1;
    }

    handle.queue_eos(StreamKind::Video, FinalResult::EndOfStream)?;

    for rx in in_flight {
        match rx.await {
            Ok(c) if c.rendered => rendered += 1,
            _ => dropped += 1,
        }
    }
    info!("Video producer: {} frames rendered, {} dropped", rendered, dropped);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
