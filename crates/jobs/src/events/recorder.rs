//! Per-worker statistics and marker events

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::event::Events;
use super::sink::Notifier;
use crate::identity::Identity;
use crate::status::Status;
use crate::work::{WorkError, WorkResult};

/// Count of each result kind a worker has reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCounts {
    pub unknown: u64,
    pub done: u64,
    pub more: u64,
    pub fail: u64,
    pub stop: u64,
    pub next: u64,
}

/// Snapshot of a worker's statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderStats {
    /// Work invocations
    pub total_runs: u64,

    /// Invocations that returned `Done`, `More` or `Next`
    pub total_passed: u64,

    /// Invocations that errored
    pub total_failed: u64,

    /// Time of the last invocation
    pub last_run: Option<DateTime<Utc>>,

    /// Message of the last error
    pub last_error: Option<String>,

    /// Result of the last invocation that returned one
    pub last_result: Option<WorkResult>,

    /// Results by kind
    pub results: ResultCounts,

    /// Marker events recorded
    pub events: u64,
}

impl RecorderStats {
    pub fn has_run(&self) -> bool {
        self.total_runs > 0
    }
}

/// Accumulates statistics and errors for one worker
///
/// Marker events (backoff start/finish, delays) go through the shared
/// [`Notifier`]; counters stay local to the worker.
#[derive(Debug)]
pub struct Recorder {
    id: Identity,
    notifier: Notifier,
    stats: Mutex<RecorderStats>,
}

impl Recorder {
    pub fn new(id: Identity, notifier: Notifier) -> Self {
        Self {
            id,
            notifier,
            stats: Mutex::new(RecorderStats::default()),
        }
    }

    /// Record a completed invocation
    pub fn record_result(&self, result: &WorkResult) {
        let mut stats = self.stats.lock();
        stats.total_runs += 1;
        if result.is_success() {
            stats.total_passed += 1;
        }
        stats.last_run = Some(Utc::now());
        stats.last_result = Some(result.clone());

        let counts = &mut stats.results;
        match result {
            WorkResult::Unknown => counts.unknown += 1,
            WorkResult::Done => counts.done += 1,
            WorkResult::More => counts.more += 1,
            WorkResult::Fail => counts.fail += 1,
            WorkResult::Stop => counts.stop += 1,
            WorkResult::Next { .. } => counts.next += 1,
        }
    }

    /// Record an invocation that errored
    pub fn record_failure(&self, error: &WorkError) {
        let mut stats = self.stats.lock();
        stats.total_runs += 1;
        stats.total_failed += 1;
        stats.last_run = Some(Utc::now());
        stats.last_error = Some(error.message.clone());
    }

    /// Record an error raised outside a work invocation (lifecycle hooks)
    pub fn record_error(&self, error: &WorkError) {
        self.stats.lock().last_error = Some(error.message.clone());
    }

    /// Emit a named marker event for the worker
    pub fn record(&self, status: Status, name: &str, fields: Vec<(String, String)>) {
        self.stats.lock().events += 1;
        let event = Events::marker(&self.id, status, name, self.notifier.target(), fields);
        self.notifier.notify(event);
    }

    pub fn snapshot(&self) -> RecorderStats {
        self.stats.lock().clone()
    }
}
