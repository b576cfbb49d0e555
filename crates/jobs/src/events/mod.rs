//! Structured events and per-worker recording
//!
//! This module provides:
//! - [`Event`] / [`Events`] - Pure builders for loggable records
//! - [`EventSink`] - Where records go ([`TracingSink`], [`ChannelSink`])
//! - [`Notifier`] - Fan-out to sinks plus broadcast subscribers
//! - [`Recorder`] - Per-worker statistics and marker events

mod event;
mod recorder;
mod sink;

pub use event::{Event, Events, NO_QUEUE};
pub use recorder::{Recorder, RecorderStats, ResultCounts};
pub use sink::{ChannelSink, EventSink, Notifier, TracingSink};
