//! Error types for avsync-renderer
//!
//! Defines renderer-specific error types using thiserror for clear error propagation.

use avsync_common::StreamKind;
use thiserror::Error;

/// Main error type for the renderer
#[derive(Error, Debug)]
pub enum Error {
    /// Audio sink write/position/start/pause errors
    #[error("Audio sink error: {0}")]
    Sink(String),

    /// Control request that violates the renderer contract
    /// (double flush, EOS carrying an OK status, double pause)
    #[error("Invalid control request: {0}")]
    InvalidControl(String),

    /// Operation not allowed in the current renderer state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A flush for this stream has not completed yet
    #[error("Flush already in progress for {0} stream")]
    FlushInProgress(StreamKind),

    /// Renderer task has exited; its mailbox is closed
    #[error("Renderer closed")]
    Closed,

    /// Errors bubbled up from the common crate (configuration validation included)
    #[error(transparent)]
    Common(#[from] avsync_common::Error),
}

/// Convenience Result type using the renderer Error
pub type Result<T> = std::result::Result<T, Error>;
