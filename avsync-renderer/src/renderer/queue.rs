//! Per-stream FIFO of pending samples
//!
//! **Responsibilities:**
//! - Buffer ownership hand-off between producer and renderer
//! - Exactly-once consumption signalling (`ConsumedSignal`)
//! - EOS sentinel that stays last until the next flush

use avsync_common::FinalResult;
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::oneshot;
use tracing::{trace, warn};

/// Decoded sample handed to the renderer
///
/// Audio payloads must hold whole sink frames. A trailing partial frame is
/// never written: the entry completes once less than one frame remains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBuffer {
    /// Interleaved PCM (audio) or opaque frame bytes (video)
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds
    pub time_us: i64,
    /// First sample after a timeline break in the source
    pub discontinuity: bool,
}

impl MediaBuffer {
    pub fn new(data: Vec<u8>, time_us: i64) -> Self {
        Self {
            data,
            time_us,
            discontinuity: false,
        }
    }

    /// Mark this buffer as the first after a source discontinuity
    pub fn with_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome delivered to the producer when the renderer lets go of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumed {
    /// Video: frame should be displayed. Audio: bytes reached the sink.
    /// False for dropped and flushed buffers.
    pub rendered: bool,
}

type ConsumedFn = Box<dyn FnOnce(Consumed) + Send>;

/// Single-shot consumption notification
///
/// Fires exactly once: either explicitly through [`ConsumedSignal::fire`], or
/// unrendered when dropped (flush, rejection, renderer shutdown).
pub struct ConsumedSignal {
    callback: Option<ConsumedFn>,
}

impl ConsumedSignal {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Consumed) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// Signal paired with a oneshot receiver carrying the outcome
    pub fn channel() -> (Self, oneshot::Receiver<Consumed>) {
        let (tx, rx) = oneshot::channel();
        let signal = Self::new(move |consumed| {
            let _ = tx.send(consumed);
        });
        (signal, rx)
    }

    /// Signal nobody listens to
    pub fn noop() -> Self {
        Self { callback: None }
    }

    pub fn fire(mut self, rendered: bool) {
        if let Some(callback) = self.callback.take() {
            callback(Consumed { rendered });
        }
    }
}

impl Drop for ConsumedSignal {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Consumed { rendered: false });
        }
    }
}

impl fmt::Debug for ConsumedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumedSignal")
            .field("armed", &self.callback.is_some())
            .finish()
    }
}

/// One buffered sample or end-of-stream marker
#[derive(Debug)]
pub(crate) enum QueueEntry {
    Sample {
        buffer: MediaBuffer,
        /// Bytes already written to the sink (audio only)
        offset: usize,
        consumed: ConsumedSignal,
    },
    Eos { final_result: FinalResult },
}

impl QueueEntry {
    pub(crate) fn time_us(&self) -> Option<i64> {
        match self {
            QueueEntry::Sample { buffer, .. } => Some(buffer.time_us),
            QueueEntry::Eos { .. } => None,
        }
    }

    pub(crate) fn is_eos(&self) -> bool {
        matches!(self, QueueEntry::Eos { .. })
    }
}

/// FIFO of entries for one stream
#[derive(Debug, Default)]
pub(crate) struct StreamQueue {
    entries: VecDeque<QueueEntry>,
}

impl StreamQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Rejected (signal fires unrendered) once EOS is queued.
    pub(crate) fn push_sample(&mut self, buffer: MediaBuffer, consumed: ConsumedSignal) -> bool {
        if self.ends_with_eos() {
            warn!(
                "Sample at {} us queued after EOS, dropping it",
                buffer.time_us
            );
            consumed.fire(false);
            return false;
        }

        self.entries.push_back(QueueEntry::Sample {
            buffer,
            offset: 0,
            consumed,
        });
        true
    }

    /// Append an EOS marker; a second marker before the next flush is refused
    pub(crate) fn push_eos(&mut self, final_result: FinalResult) -> bool {
        if self.ends_with_eos() {
            return false;
        }
        self.entries.push_back(QueueEntry::Eos { final_result });
        true
    }

    pub(crate) fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub(crate) fn front_mut(&mut self) -> Option<&mut QueueEntry> {
        self.entries.front_mut()
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Timestamp of the head entry (None when empty or head is EOS)
    pub(crate) fn head_time_us(&self) -> Option<i64> {
        self.entries.front().and_then(QueueEntry::time_us)
    }

    /// Drop the head entry, firing its signal unrendered
    pub(crate) fn drop_front(&mut self) -> Option<i64> {
        match self.entries.pop_front()? {
            QueueEntry::Sample {
                buffer, consumed, ..
            } => {
                consumed.fire(false);
                Some(buffer.time_us)
            }
            QueueEntry::Eos { .. } => None,
        }
    }

    /// Drop everything; returns the number of samples released
    pub(crate) fn flush(&mut self) -> usize {
        let mut released = 0;
        while let Some(entry) = self.entries.pop_front() {
            if let QueueEntry::Sample { consumed, .. } = entry {
                consumed.fire(false);
                released += 1;
            }
        }
        trace!("Stream queue flushed, {} samples released", released);
        released
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ends_with_eos(&self) -> bool {
        self.entries.back().is_some_and(QueueEntry::is_eos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_signal(log: &Arc<Mutex<Vec<(i64, bool)>>>, id: i64) -> ConsumedSignal {
        let log = Arc::clone(log);
        ConsumedSignal::new(move |c| log.lock().unwrap().push((id, c.rendered)))
    }

    #[test]
    fn test_signal_fires_once_on_explicit_fire() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let signal = recording_signal(&log, 1);
        signal.fire(true);
        assert_eq!(*log.lock().unwrap(), vec![(1, true)]);
    }

    #[test]
    fn test_signal_fires_unrendered_on_drop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        drop(recording_signal(&log, 7));
        assert_eq!(*log.lock().unwrap(), vec![(7, false)]);
    }

    #[tokio::test]
    async fn test_signal_channel() {
        let (signal, rx) = ConsumedSignal::channel();
        signal.fire(true);
        assert_eq!(rx.await.unwrap(), Consumed { rendered: true });
    }

    #[test]
    fn test_queue_fifo_and_flush_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = StreamQueue::new();

        for i in 0..3 {
            assert!(queue.push_sample(
                MediaBuffer::new(vec![0; 4], i * 1000),
                recording_signal(&log, i)
            ));
        }
        assert_eq!(queue.head_time_us(), Some(0));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.flush(), 3);
        assert!(queue.is_empty());
        assert_eq!(*log.lock().unwrap(), vec![(0, false), (1, false), (2, false)]);
    }

    #[test]
    fn test_eos_stays_last() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = StreamQueue::new();

        assert!(queue.push_eos(FinalResult::EndOfStream));
        assert!(!queue.push_eos(FinalResult::Aborted));
        assert!(!queue.push_sample(MediaBuffer::new(vec![1], 5), recording_signal(&log, 5)));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.head_time_us(), None);
        assert_eq!(*log.lock().unwrap(), vec![(5, false)]);

        // A flush clears the marker
        queue.flush();
        assert!(queue.push_sample(MediaBuffer::new(vec![1], 6), ConsumedSignal::noop()));
    }

    #[test]
    fn test_drop_front_returns_timestamp() {
        let mut queue = StreamQueue::new();
        queue.push_sample(MediaBuffer::new(vec![], 42), ConsumedSignal::noop());
        assert_eq!(queue.drop_front(), Some(42));
        assert_eq!(queue.drop_front(), None);
    }
}
