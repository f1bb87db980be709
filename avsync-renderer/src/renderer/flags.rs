//! State shared between handles and the renderer task
//!
//! Only the flushing flags and the stall bookkeeping are visible across
//! threads; both are updated by callers before the matching command is
//! posted, so concurrent ingestion observes them immediately.

use crate::error::{Error, Result};
use avsync_common::StreamKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Stall (delay) bookkeeping
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DelayState {
    /// A stall is in progress
    pub(crate) pending: bool,
    /// Stall requested while another was active (0 = none)
    pub(crate) queued_us: i64,
    /// Request time of the cached stall
    pub(crate) queued_at_us: i64,
}

#[derive(Debug, Default)]
pub(crate) struct SharedFlags {
    flushing_audio: AtomicBool,
    flushing_video: AtomicBool,
    delay: Mutex<DelayState>,
}

impl SharedFlags {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn flushing(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Audio => &self.flushing_audio,
            StreamKind::Video => &self.flushing_video,
        }
    }

    /// Mark a flush as in progress; a second flush before completion is refused
    pub(crate) fn begin_flush(&self, stream: StreamKind) -> Result<()> {
        self.flushing(stream)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::FlushInProgress(stream))
    }

    pub(crate) fn end_flush(&self, stream: StreamKind) {
        self.flushing(stream).store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_flushing(&self, stream: StreamKind) -> bool {
        self.flushing(stream).load(Ordering::SeqCst)
    }

    fn delay_state(&self) -> std::sync::MutexGuard<'_, DelayState> {
        self.delay.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn delay_pending(&self) -> bool {
        self.delay_state().pending
    }

    /// Register a stall request made at `now_us`
    ///
    /// Returns true when the caller must start the stall. While one is active
    /// the request is cached (replacing any earlier cached request) instead.
    pub(crate) fn request_delay(&self, delay_us: i64, now_us: i64) -> bool {
        let mut state = self.delay_state();
        if state.pending {
            state.queued_us = delay_us;
            state.queued_at_us = now_us;
            return false;
        }
        state.pending = true;
        state.queued_us = 0;
        true
    }

    /// Active stall expired at `now_us`
    ///
    /// Returns the remaining part of a cached request, in which case the stall
    /// stays pending; otherwise the stall ends.
    pub(crate) fn finish_delay(&self, now_us: i64) -> Option<i64> {
        let mut state = self.delay_state();
        let queued_us = std::mem::take(&mut state.queued_us);
        let remaining = queued_us - (now_us - state.queued_at_us);

        if queued_us > 0 && remaining > 0 {
            state.pending = true;
            Some(remaining)
        } else {
            state.pending = false;
            None
        }
    }

    pub(crate) fn delay_snapshot(&self) -> DelayState {
        *self.delay_state()
    }
}
