//! # AVSync Renderer Library (avsync-renderer)
//!
//! Audio/video synchronization and pacing engine.
//!
//! **Purpose:** Accept independently timestamped decoded audio and video
//! buffers, write audio to a sink and hand video back with a render/drop
//! decision, keeping both on one presentation clock through pauses, stalls,
//! flushes and discontinuities.
//!
//! **Architecture:** Single-task actor on tokio (mailbox + deadline heap),
//! audio output behind the `AudioSink` trait (simulated, or cpal with the
//! `cpal-output` feature)

pub mod audio;
pub mod error;
pub mod renderer;

pub use avsync_common::config::RendererConfig;
pub use error::{Error, Result};
pub use renderer::{
    Consumed, ConsumedSignal, MediaBuffer, Renderer, RendererHandle, RendererSnapshot, SyncStats,
};
