//! Timer scheduling for delayed commands
//!
//! Pause-then-resume and delay-then-start never sleep on a worker's command
//! loop. The callback is parked on a small dedicated runtime and, when it
//! fires, only enqueues a command for the worker.
//!
//! ```text
//!  Coordinator::pause ──► Scheduler::schedule(at, cb)
//!                                   │
//!                       timer runtime (N threads)
//!                                   │ sleep(at - now)
//!                                   ▼
//!                           cb: send Resume ──► worker command channel
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, trace};

/// Errors from the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is shut down")]
    Closed,

    #[error("delay out of range: {0}")]
    OutOfRange(String),

    #[error("failed to build timer runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Fires a callback once, no earlier than an absolute point in time
pub trait Scheduler: Send + Sync {
    /// Run `callback` once `at` has passed. Times in the past fire immediately.
    fn schedule(
        &self,
        at: DateTime<Utc>,
        callback: BoxFuture<'static, ()>,
    ) -> Result<(), SchedulerError>;

    /// Run `callback` after `delay` from now
    fn schedule_after(
        &self,
        delay: Duration,
        callback: BoxFuture<'static, ()>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| SchedulerError::OutOfRange(e.to_string()))?;
        let at = Utc::now()
            .checked_add_signed(delay)
            .ok_or_else(|| SchedulerError::OutOfRange(format!("{delay}")))?;
        self.schedule(at, callback)?;
        Ok(at)
    }

    /// Refuse new timers and discard pending ones
    fn shutdown(&self) {}
}

/// Delay until `at`, zero if it has already passed
pub fn delay_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// [`Scheduler`] backed by tokio timers on a dedicated runtime
pub struct TimerScheduler {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    closed: AtomicBool,
    pending: Arc<AtomicUsize>,
}

impl TimerScheduler {
    /// Default number of timer threads
    pub const DEFAULT_THREADS: usize = 2;

    /// Build a scheduler that owns a timer runtime with `threads` threads
    pub fn new(threads: usize) -> Result<Self, SchedulerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("workcrew-timer")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            handle,
            runtime: Mutex::new(Some(runtime)),
            closed: AtomicBool::new(false),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Scheduler that spawns timers on an existing runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: Mutex::new(None),
            closed: AtomicBool::new(false),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Timers scheduled but not yet fired
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(
        &self,
        at: DateTime<Utc>,
        callback: BoxFuture<'static, ()>,
    ) -> Result<(), SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let delay = delay_until(at);
        trace!(delay_ms = delay.as_millis() as u64, "scheduling timer");

        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::SeqCst);
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // Timers round up, but wall clock may still lag the monotonic clock
            let remaining = delay_until(at);
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
            pending.fetch_sub(1, Ordering::SeqCst);
            callback.await;
        });
        Ok(())
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.runtime.lock().take() {
            debug!(pending = self.pending(), "shutting down timer runtime");
            runtime.shutdown_background();
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        Scheduler::shutdown(self);
    }
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Instant;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_never_fires_early() {
        let scheduler = TimerScheduler::new(1).unwrap();
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let at = Utc::now() + chrono::Duration::milliseconds(200);

        scheduler
            .schedule(
                at,
                async move {
                    let _ = tx.send((Instant::now(), Utc::now()));
                }
                .boxed(),
            )
            .unwrap();
        assert_eq!(scheduler.pending(), 1);

        let (fired, wall) = rx.await.unwrap();
        assert!(fired.duration_since(started) >= Duration::from_millis(200));
        assert!(wall >= at);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_past_time_fires_immediately() {
        let scheduler = TimerScheduler::new(1).unwrap();
        let (tx, rx) = oneshot::channel();
        let at = Utc::now() - chrono::Duration::seconds(10);

        let callback = async move {
            let _ = tx.send(());
        }
        .boxed();
        scheduler.schedule(at, callback).unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("timer should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_schedule_after_returns_fire_time() {
        let scheduler = TimerScheduler::with_handle(Handle::current());
        let (tx, rx) = oneshot::channel();
        let before = Utc::now();
        let callback = async move {
            let _ = tx.send(());
        }
        .boxed();
        let at = scheduler
            .schedule_after(Duration::from_millis(50), callback)
            .unwrap();
        assert!(at >= before + chrono::Duration::milliseconds(50));
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_timers() {
        let scheduler = TimerScheduler::new(1).unwrap();
        scheduler.shutdown();
        let result = scheduler.schedule(Utc::now(), async {}.boxed());
        assert!(matches!(result, Err(SchedulerError::Closed)));
    }

    #[test]
    fn test_delay_until_clamps_to_zero() {
        assert_eq!(delay_until(Utc::now() - chrono::Duration::seconds(1)), Duration::ZERO);
        assert!(delay_until(Utc::now() + chrono::Duration::seconds(5)) > Duration::from_secs(4));
    }
}
