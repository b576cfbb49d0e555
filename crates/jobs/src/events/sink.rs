//! Sinks that receive structured events
//!
//! Sinks are synchronous and must never block: a slow or missing consumer
//! loses events instead of stalling a worker.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use super::event::{Event, NO_QUEUE};

/// Receives every event emitted for a worker
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes events as `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        let extra = event
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");

        info!(
            uuid = %event.uuid,
            area = %event.area,
            service = %event.service,
            agent = %event.agent,
            env = %event.env,
            instance = %event.instance,
            status = %event.status,
            code = event.code,
            source = %event.source,
            target = %event.target,
            fields = %extra,
            "{}",
            event.name
        );
    }
}

/// Forwards events into a bounded channel, dropping when full or closed
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of events that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) {
        if self.tx.try_send(event.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Fans an event out to the configured sinks and to live subscribers
#[derive(Clone)]
pub struct Notifier {
    sinks: Vec<Arc<dyn EventSink>>,
    tx: broadcast::Sender<Event>,
    target: String,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(vec![Arc::new(TracingSink)], NO_QUEUE)
    }
}

impl Notifier {
    /// Default broadcast buffer per subscriber
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(sinks: Vec<Arc<dyn EventSink>>, target: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(Self::DEFAULT_CAPACITY);
        Self {
            sinks,
            tx,
            target: target.into(),
        }
    }

    /// Notifier that discards everything (tests, benchmarks)
    pub fn silent() -> Self {
        Self::new(vec![], NO_QUEUE)
    }

    /// Target recorded on every event (queue name or `no-queue`)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Subscribe to every event sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Deliver an event
    pub fn notify(&self, event: Event) {
        for sink in &self.sinks {
            if catch_unwind(AssertUnwindSafe(|| sink.emit(&event))).is_err() {
                warn!(event = %event.name, "event sink panicked, event dropped for that sink");
            }
        }
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sinks", &self.sinks.len())
            .field("target", &self.target)
            .finish()
    }
}
