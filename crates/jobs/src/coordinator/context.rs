//! Per-worker bundle held by the coordinator

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::events::Recorder;
use crate::identity::Identity;
use crate::reliability::{Backoffs, PolicyDecision, WorkPolicy};
use crate::status::Status;
use crate::work::Worker;

/// A worker plus its private backoff cursor, recorder and policies
///
/// Built once per worker when the coordinator is built. The halt generation
/// increases on every pause, backoff, stop and kill; timers armed under an
/// older generation no-op when they fire.
#[derive(Debug)]
pub struct WorkerContext {
    worker: Arc<Worker>,
    backoffs: Mutex<Backoffs>,
    recorder: Recorder,
    policies: Vec<Box<dyn WorkPolicy>>,
    generation: AtomicU64,
}

impl WorkerContext {
    pub(crate) fn new(worker: Arc<Worker>, backoffs: Backoffs, recorder: Recorder) -> Self {
        Self {
            worker,
            backoffs: Mutex::new(backoffs),
            recorder,
            policies: Vec::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub(crate) fn with_policies(mut self, policies: Vec<Box<dyn WorkPolicy>>) -> Self {
        self.policies = policies;
        self
    }

    pub fn id(&self) -> &Identity {
        self.worker.id()
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn status(&self) -> Status {
        self.worker.status()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Copy of the backoff cursor
    pub fn backoffs(&self) -> Backoffs {
        self.backoffs.lock().clone()
    }

    pub fn policies(&self) -> &[Box<dyn WorkPolicy>] {
        &self.policies
    }

    /// Replace the backoff cursor once its next delay has been armed
    pub(crate) fn store_backoffs(&self, backoffs: Backoffs) {
        *self.backoffs.lock() = backoffs;
    }

    pub(crate) fn reset_backoff(&self) {
        self.backoffs.lock().reset();
    }

    /// Halt generation; bumped by every accepted pause, backoff, stop, kill and failure
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate every timer armed so far; returns the new generation
    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// First decision other than `Proceed`, tagged with the policy name
    ///
    /// A panicking policy is logged and treated as `Proceed`.
    pub(crate) fn consult(&self) -> Option<(&'static str, PolicyDecision)> {
        let stats = self.recorder.snapshot();
        for policy in &self.policies {
            match catch_unwind(AssertUnwindSafe(|| policy.check(&stats))) {
                Ok(PolicyDecision::Proceed) => {}
                Ok(decision) => return Some((policy.name(), decision)),
                Err(_) => {
                    warn!(worker = %self.id(), policy = policy.name(), "Policy panicked, ignoring");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::Notifier;
    use crate::reliability::RunLimit;
    use crate::work::WorkResult;

    fn context() -> WorkerContext {
        let id = Identity::test("ctx");
        let worker = Arc::new(Worker::new(id.clone()).with_notifier(Notifier::silent()));
        WorkerContext::new(
            worker,
            Backoffs::seconds(&[1, 2]),
            Recorder::new(id, Notifier::silent()),
        )
    }

    #[test]
    fn test_generation_bumps() {
        let ctx = context();
        assert_eq!(ctx.generation(), 0);
        assert_eq!(ctx.bump_generation(), 1);
        assert_eq!(ctx.bump_generation(), 2);
        assert_eq!(ctx.generation(), 2);
    }

    #[test]
    fn test_backoff_cursor_is_private() {
        let ctx = context();
        let mut cursor = ctx.backoffs();
        assert_eq!(cursor.next(), Duration::from_secs(1));
        // Advancing a copy leaves the stored cursor alone
        assert!(!ctx.backoffs().is_engaged());

        ctx.store_backoffs(cursor);
        assert!(ctx.backoffs().is_engaged());
        ctx.reset_backoff();
        assert!(!ctx.backoffs().is_engaged());
        assert_eq!(ctx.status(), Status::InActive);
    }

    #[derive(Debug)]
    struct Exploding;

    impl WorkPolicy for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn check(&self, _stats: &crate::events::RecorderStats) -> PolicyDecision {
            panic!("policy bug")
        }
    }

    #[test]
    fn test_consult_returns_first_objection() {
        let ctx = context().with_policies(vec![Box::new(Exploding), Box::new(RunLimit::new(1))]);
        assert!(ctx.consult().is_none());

        ctx.recorder().record_result(&WorkResult::Done);
        let (name, decision) = ctx.consult().unwrap();
        assert_eq!(name, "run_limit");
        assert!(matches!(decision, PolicyDecision::Stop { .. }));
    }
}
