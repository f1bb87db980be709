//! Audio output using cpal
//!
//! `CpalSink` implements [`AudioSink`] over a real output device. The cpal
//! stream lives on a dedicated audio thread (streams are not `Send` on every
//! platform); the renderer side only holds the ring producer, shared counters
//! and a control channel.

use crate::audio::ring_buffer::{PcmConsumer, PcmProducer, PcmRingBuffer};
use crate::audio::sink::AudioSink;
use crate::error::{Error, Result};
use avsync_common::config::SinkConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bytes per sample (16-bit PCM)
const BYTES_PER_SAMPLE: usize = 2;

enum StreamControl {
    Play,
    Pause,
}

/// Output device sink
pub struct CpalSink {
    producer: PcmProducer,
    control_tx: mpsc::Sender<StreamControl>,
    /// Stream error flag - set by audio callback on error
    error_flag: Arc<AtomicBool>,
    sample_rate: u32,
    channels: usize,
    buffer_frames: u64,
    latency_ms: u32,
    frames_written: u64,
}

impl CpalSink {
    /// Open the default output device (or the named one) and start its audio thread
    pub fn open(device_name: Option<String>, config: &SinkConfig) -> Result<Self> {
        let channels = config.channels.max(1) as usize;
        let ring = PcmRingBuffer::new(config.buffer_frames as usize, channels);
        let (producer, consumer) = ring.split();
        let (control_tx, control_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let error_flag = Arc::new(AtomicBool::new(false));

        let stream_config = StreamConfig {
            channels: config.channels.max(1),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let thread_error_flag = Arc::clone(&error_flag);

        std::thread::Builder::new()
            .name("avsync-audio-out".to_string())
            .spawn(move || {
                let stream = match open_device(device_name.as_deref())
                    .and_then(|(device, format)| {
                        build_stream(&device, &stream_config, format, consumer, thread_error_flag)
                    }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Stream lives until the sink (and its control sender) is dropped
                while let Ok(control) = control_rx.recv() {
                    let result = match control {
                        StreamControl::Play => stream.play().map_err(|e| e.to_string()),
                        StreamControl::Pause => stream.pause().map_err(|e| e.to_string()),
                    };
                    if let Err(e) = result {
                        error!("Audio stream control failed: {}", e);
                    }
                }
                debug!("Audio output thread exiting");
            })
            .map_err(|e| Error::Sink(format!("Failed to spawn audio thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Sink("Audio thread exited during startup".to_string()))??;

        info!(
            "Audio output opened: {} Hz, {} channels, {} frames buffer",
            config.sample_rate, channels, config.buffer_frames
        );

        Ok(Self {
            producer,
            control_tx,
            error_flag,
            sample_rate: config.sample_rate.max(1),
            channels,
            buffer_frames: config.buffer_frames as u64,
            latency_ms: config.latency_ms,
            frames_written: 0,
        })
    }

    fn send_control(&self, control: StreamControl) -> Result<()> {
        self.control_tx
            .send(control)
            .map_err(|_| Error::Sink("Audio thread has exited".to_string()))
    }

    fn check_stream_error(&self) -> Result<()> {
        if self.error_flag.load(Ordering::SeqCst) {
            return Err(Error::Sink("Audio stream reported an error".to_string()));
        }
        Ok(())
    }
}

/// Find the requested device, falling back to the default device
fn open_device(device_name: Option<&str>) -> Result<(Device, SampleFormat)> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::Sink(format!("Failed to enumerate devices: {}", e)))?;

            match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                Some(dev) => dev,
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::Sink(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Sink("No default output device found".to_string()))?,
    };

    let format = device
        .default_output_config()
        .map_err(|e| Error::Sink(format!("Failed to get default config: {}", e)))?
        .sample_format();

    info!(
        "Using audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok((device, format))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    format: SampleFormat,
    mut consumer: PcmConsumer,
    error_flag: Arc<AtomicBool>,
) -> Result<Stream> {
    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        error_flag.store(true, Ordering::SeqCst);
    };

    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = consumer.pop().map_or(0.0, |s| s as f32 / i16::MAX as f32);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = consumer.pop().unwrap_or(0);
                }
            },
            err_fn,
            None,
        ),
        other => {
            return Err(Error::Sink(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream.map_err(|e| Error::Sink(format!("Failed to build stream: {}", e)))
}

impl AudioSink for CpalSink {
    fn start(&mut self) -> Result<()> {
        self.send_control(StreamControl::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.send_control(StreamControl::Pause)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_stream_error()?;

        // Only whole frames are accepted
        let frame_bytes = self.channels * BYTES_PER_SAMPLE;
        let room_frames = self.producer.vacant_len() / self.channels;
        let frames = (data.len() / frame_bytes).min(room_frames);
        let accepted = frames * frame_bytes;

        let samples: Vec<i16> = data[..accepted]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let pushed = self.producer.push_slice(&samples);
        debug_assert_eq!(pushed, samples.len());

        self.frames_written += frames as u64;
        Ok(accepted)
    }

    fn position(&mut self) -> Result<u64> {
        self.check_stream_error()?;
        Ok(self.producer.frames_played())
    }

    fn frames_written(&self) -> Result<u64> {
        Ok(self.frames_written)
    }

    fn frame_count(&self) -> u64 {
        self.buffer_frames
    }

    fn frame_size(&self) -> usize {
        self.channels * BYTES_PER_SAMPLE
    }

    fn msecs_per_frame(&self) -> f32 {
        1000.0 / self.sample_rate as f32
    }

    fn latency_ms(&self) -> u32 {
        self.latency_ms
    }
}
