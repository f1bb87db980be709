//! Stream and notification types shared between the renderer and its control layer
//!
//! Renderer notifications are serializable so the control layer (or the
//! session binary) can log or forward them as JSON.

use serde::{Deserialize, Serialize};

/// Which of the two elementary streams a buffer or control request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    /// The other stream of the pair
    pub fn other(self) -> Self {
        match self {
            StreamKind::Audio => StreamKind::Video,
            StreamKind::Video => StreamKind::Audio,
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, StreamKind::Audio)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// Terminal status a producer attaches to an end-of-stream marker
///
/// `Ok` exists so callers can forward decoder status codes unchanged; the
/// renderer rejects an EOS carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum FinalResult {
    Ok,
    /// Regular end of stream
    EndOfStream,
    /// Producer was shut down before reaching the end
    Aborted,
    /// Decoder failure with its native status code
    Failed(i32),
}

impl FinalResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, FinalResult::Ok)
    }
}

impl std::fmt::Display for FinalResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalResult::Ok => write!(f, "ok"),
            FinalResult::EndOfStream => write!(f, "end-of-stream"),
            FinalResult::Aborted => write!(f, "aborted"),
            FinalResult::Failed(code) => write!(f, "failed({})", code),
        }
    }
}

/// Origin of an error notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    /// Audio sink write/position/start/pause failure
    Sink,
    /// Control request that does not fit the current state
    Control,
}

/// Notifications emitted by the renderer towards the control layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RendererEvent {
    /// EOS marker reached the head of a stream queue
    Eos {
        stream: StreamKind,
        final_result: FinalResult,
    },

    /// A flush request finished; the stream queue is empty
    FlushComplete { stream: StreamKind },

    /// Presentation position, rate-limited
    Position {
        /// Current media position in microseconds
        position_us: i64,
        /// Lateness of the most recently drained video frame
        video_late_by_us: i64,
    },

    /// Sink or control-sequence error
    Error { source: ErrorSource, message: String },
}

impl RendererEvent {
    /// Serialize to a single-line JSON string (for logs and forwarding)
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}
