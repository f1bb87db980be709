/// Lock-free ring buffer for PCM samples
///
/// Single-producer single-consumer ring between the renderer task (writes
/// accepted PCM) and the cpal output callback (plays it).
///
/// Design:
/// - Producer (renderer task): pushes as many samples as fit, never blocks
/// - Consumer (audio callback): pops without locks, outputs silence when empty
/// - Played-frame counter is advanced only for real samples, so the renderer's
///   position query never runs ahead of written data

use ringbuf::{traits::*, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Lock-free ring buffer for interleaved i16 samples
pub struct PcmRingBuffer {
    buffer: HeapRb<i16>,
    channels: usize,
    frames_played: Arc<AtomicU64>,
    underruns: Arc<AtomicU64>,
}

impl PcmRingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            buffer: HeapRb::new(capacity_frames.max(1) * channels),
            channels,
            frames_played: Arc::new(AtomicU64::new(0)),
            underruns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Split into producer and consumer halves
    pub fn split(self) -> (PcmProducer, PcmConsumer) {
        let (prod, cons) = self.buffer.split();

        let producer = PcmProducer {
            producer: prod,
            frames_played: Arc::clone(&self.frames_played),
        };

        let consumer = PcmConsumer {
            consumer: cons,
            channels: self.channels,
            frames_played: Arc::clone(&self.frames_played),
            underruns: Arc::clone(&self.underruns),
            pending_samples: 0,
        };

        (producer, consumer)
    }
}

/// Producer half (renderer task)
pub struct PcmProducer {
    producer: ringbuf::HeapProd<i16>,
    frames_played: Arc<AtomicU64>,
}

impl PcmProducer {
    /// Push samples; returns how many were accepted
    pub fn push_slice(&mut self, samples: &[i16]) -> usize {
        self.producer.push_slice(samples)
    }

    /// Free space in samples
    pub fn vacant_len(&self) -> usize {
        self.producer.vacant_len()
    }

    /// Frames the consumer has played so far
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Acquire)
    }
}

/// Consumer half (audio callback)
pub struct PcmConsumer {
    consumer: ringbuf::HeapCons<i16>,
    channels: usize,
    frames_played: Arc<AtomicU64>,
    underruns: Arc<AtomicU64>,
    /// Samples popped since the last whole frame boundary
    pending_samples: usize,
}

impl PcmConsumer {
    /// Pop one sample, or None on underrun (caller outputs silence)
    pub fn pop(&mut self) -> Option<i16> {
        match self.consumer.try_pop() {
            Some(sample) => {
                self.pending_samples += 1;
                if self.pending_samples == self.channels {
                    self.pending_samples = 0;
                    self.frames_played.fetch_add(1, Ordering::Release);
                }
                Some(sample)
            }
            None => {
                let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;

                // Log every 10000th underrun sample to avoid spam
                if count % 10_000 == 0 {
                    if count < 100_000 {
                        trace!("PCM ring underrun (total samples: {})", count);
                    } else {
                        warn!("PCM ring underrun (total samples: {})", count);
                    }
                }
                None
            }
        }
    }
}
