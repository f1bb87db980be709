//! # AVSync Common Library
//!
//! Shared code for the AVSync renderer crates including:
//! - Stream and event types (RendererEvent enum)
//! - Bootstrap configuration loading and config file resolution
//! - Error types
//! - Microsecond time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{ErrorSource, FinalResult, RendererEvent, StreamKind};
