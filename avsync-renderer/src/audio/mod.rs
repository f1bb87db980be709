//! Audio sink adapters
//!
//! The renderer only sees the [`AudioSink`] trait. `SimulatedSink` models a
//! device on the tokio clock; `CpalSink` drives a real output device.

#[cfg(feature = "cpal-output")]
pub mod output;
#[cfg(feature = "cpal-output")]
pub mod ring_buffer;
pub mod simulated;
pub mod sink;

#[cfg(feature = "cpal-output")]
pub use output::CpalSink;
pub use simulated::{SimulatedSink, SinkProbe};
pub use sink::AudioSink;
