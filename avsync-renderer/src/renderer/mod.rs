//! A/V sync renderer
//!
//! The renderer runs as a single tokio task owning both stream queues and the
//! anchor clock. Producers and the control layer talk to it through a
//! cloneable [`RendererHandle`]; every call posts a command and returns
//! without waiting for the renderer (discontinuity and snapshot await a
//! reply).
//!
//! Module layout:
//! - `handle`: task spawn and the public handle
//! - `core`: state, mailbox, run loop
//! - `ingest`: queueing, start gating, cross-queue alignment
//! - `drain`: audio/video drain scheduling
//! - `control`: flush, pause/resume, stalls, anchor refresh
//! - `diagnostics`: state snapshot

mod anchor;
mod clock;
mod control;
mod core;
mod diagnostics;
mod drain;
mod flags;
mod handle;
mod ingest;
mod queue;
mod stats;

pub use anchor::AnchorClock;
pub use clock::MediaClock;
pub use diagnostics::RendererSnapshot;
pub use handle::{Renderer, RendererHandle};
pub use queue::{Consumed, ConsumedSignal, MediaBuffer};
pub use stats::SyncStats;
