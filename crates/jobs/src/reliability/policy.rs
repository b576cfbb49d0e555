//! Run policies consulted before every work invocation
//!
//! A policy looks at the worker's [`RecorderStats`] (runs, passes, failures
//! and the last [`WorkResult`](crate::work::WorkResult)) and decides whether
//! the next invocation may go ahead. Each worker gets its own policy
//! instances, so stateful policies never share counters across workers.
//!
//! ```text
//! Process ──► policies ──► Proceed ──► work()
//!                 │
//!                 ├──► Pause { reason, delay } ──► pause
//!                 └──► Stop { reason }         ──► stop
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::events::RecorderStats;

/// What a policy wants done before the next invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Run the work
    Proceed,

    /// Pause the worker; `None` uses the configured pause duration
    Pause {
        reason: String,
        delay: Option<Duration>,
    },

    /// Stop the worker until it is started again
    Stop { reason: String },
}

impl PolicyDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Gate evaluated before each work invocation
pub trait WorkPolicy: Send + Sync + std::fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn check(&self, stats: &RecorderStats) -> PolicyDecision;
}

/// Stops the worker once it has run `max_runs` times
///
/// # Example
///
/// ```
/// use workcrew_jobs::reliability::{PolicyDecision, RunLimit, WorkPolicy};
/// use workcrew_jobs::RecorderStats;
///
/// let limit = RunLimit::new(2);
/// let mut stats = RecorderStats::default();
/// assert!(limit.check(&stats).is_proceed());
///
/// stats.total_runs = 2;
/// assert!(matches!(limit.check(&stats), PolicyDecision::Stop { .. }));
/// ```
#[derive(Debug, Clone)]
pub struct RunLimit {
    max_runs: u64,
}

impl RunLimit {
    pub fn new(max_runs: u64) -> Self {
        Self { max_runs }
    }

    pub fn max_runs(&self) -> u64 {
        self.max_runs
    }
}

impl WorkPolicy for RunLimit {
    fn name(&self) -> &'static str {
        "run_limit"
    }

    fn check(&self, stats: &RecorderStats) -> PolicyDecision {
        if stats.total_runs >= self.max_runs {
            PolicyDecision::Stop {
                reason: format!("run limit {} reached", self.max_runs),
            }
        } else {
            PolicyDecision::Proceed
        }
    }
}

/// Pauses the worker while the share of unsuccessful runs is too high
///
/// A run is unsuccessful when it errored or returned anything other than
/// `Done`, `More` or `Next`. After tripping, one trial run is let through
/// before the ratio is checked again, like a half-open circuit.
#[derive(Debug)]
pub struct ErrorRatio {
    threshold: f64,
    min_runs: u64,
    delay: Option<Duration>,
    /// `total_runs` when the policy last tripped, `u64::MAX` if never
    tripped_at: AtomicU64,
}

impl ErrorRatio {
    /// Trip when `unsuccessful / total >= threshold` (0.0 ..= 1.0)
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            min_runs: 10,
            delay: None,
            tripped_at: AtomicU64::new(u64::MAX),
        }
    }

    /// Runs required before the ratio is considered (default: 10)
    pub fn with_min_runs(mut self, min_runs: u64) -> Self {
        self.min_runs = min_runs;
        self
    }

    /// Pause length when tripped (default: configured pause duration)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn ratio(stats: &RecorderStats) -> f64 {
        if stats.total_runs == 0 {
            return 0.0;
        }
        let unsuccessful = stats.total_runs.saturating_sub(stats.total_passed);
        unsuccessful as f64 / stats.total_runs as f64
    }
}

impl WorkPolicy for ErrorRatio {
    fn name(&self) -> &'static str {
        "error_ratio"
    }

    fn check(&self, stats: &RecorderStats) -> PolicyDecision {
        if stats.total_runs < self.min_runs.max(1) {
            return PolicyDecision::Proceed;
        }
        // Nothing ran since the last trip: allow the trial run
        if self.tripped_at.load(Ordering::SeqCst) == stats.total_runs {
            return PolicyDecision::Proceed;
        }

        let ratio = Self::ratio(stats);
        if ratio < self.threshold {
            return PolicyDecision::Proceed;
        }

        self.tripped_at.store(stats.total_runs, Ordering::SeqCst);
        PolicyDecision::Pause {
            reason: format!(
                "error ratio {:.2} over {:.2} after {} runs",
                ratio, self.threshold, stats.total_runs
            ),
            delay: self.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(runs: u64, passed: u64) -> RecorderStats {
        RecorderStats {
            total_runs: runs,
            total_passed: passed,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_limit() {
        let limit = RunLimit::new(3);
        assert!(limit.check(&stats(2, 2)).is_proceed());
        assert_eq!(
            limit.check(&stats(3, 3)),
            PolicyDecision::Stop {
                reason: "run limit 3 reached".to_string()
            }
        );
    }

    #[test]
    fn test_error_ratio_waits_for_min_runs() {
        let policy = ErrorRatio::new(0.5).with_min_runs(4);
        assert!(policy.check(&stats(3, 0)).is_proceed());
        assert!(!policy.check(&stats(4, 1)).is_proceed());
    }

    #[test]
    fn test_error_ratio_below_threshold() {
        let policy = ErrorRatio::new(0.5).with_min_runs(1);
        assert!(policy.check(&stats(3, 2)).is_proceed());
    }

    #[test]
    fn test_error_ratio_allows_one_trial_run_after_tripping() {
        let policy = ErrorRatio::new(0.5)
            .with_min_runs(2)
            .with_delay(Duration::from_secs(5));

        match policy.check(&stats(2, 0)) {
            PolicyDecision::Pause { delay, .. } => assert_eq!(delay, Some(Duration::from_secs(5))),
            other => panic!("expected pause, got {other:?}"),
        }
        // Resumed without running: trial run goes ahead
        assert!(policy.check(&stats(2, 0)).is_proceed());
        // Trial failed: trips again
        assert!(!policy.check(&stats(3, 0)).is_proceed());
        // Trial succeeded enough to bring the ratio down
        assert!(policy.check(&stats(4, 3)).is_proceed());
    }

    #[test]
    fn test_zero_runs_never_trips() {
        let policy = ErrorRatio::new(0.0).with_min_runs(0);
        assert!(policy.check(&stats(0, 0)).is_proceed());
    }
}
