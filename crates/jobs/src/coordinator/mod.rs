//! Worker coordination
//!
//! This module provides:
//! - [`Coordinator`] - Registry of workers plus the control operations
//! - [`CoordinatorBuilder`] - Fixes the worker set, queue, sinks and config
//! - [`WorkerContext`] - Per-worker bundle (worker, backoff cursor, recorder, policies)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Coordinator                           │
//! │   start / process / pause / backoff / resume / stop / kill   │
//! │                            │                                 │
//! │              Identity ──► WorkerHandle (fixed at build)      │
//! │                            │ mpsc (one channel per worker)   │
//! │                            ▼                                 │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │ Executor (one task per worker, one command at a time)│    │
//! │  │   validate ─► move ─► hook ─► work ─► interpret      │    │
//! │  └───────▲──────────────────────────────┬───────────────┘    │
//! │          │ Resume / Start               │ More / Next        │
//! │  ┌───────┴──────────┐                   │ (re-enqueued)      │
//! │  │ Scheduler (timer │◄── pause/backoff/delay                 │
//! │  │ runtime)         │                                        │
//! │  └──────────────────┘                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use workcrew_jobs::prelude::*;
//!
//! let id = Identity::worker("billing", "invoices", "dev");
//! let worker = Worker::from_fn(id.clone(), |_task| async { Ok(WorkResult::Done) });
//!
//! let coordinator = Coordinator::builder()
//!     .with_worker(worker)
//!     .build()?;
//!
//! coordinator.start(&id, Task::Empty, false).await?;
//! coordinator.pause(&id, Some("maintenance"), Some(Duration::from_secs(60))).await?;
//!
//! coordinator.shutdown().await?;
//! ```

mod command;
mod context;
mod executor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, CoordinatorConfig};
use crate::events::{Event, EventSink, Events, Notifier, Recorder, TracingSink, NO_QUEUE};
use crate::identity::Identity;
use crate::queue::Queue;
use crate::reliability::WorkPolicy;
use crate::scheduler::{Scheduler, SchedulerError, TimerScheduler};
use crate::status::{Status, TransitionError};
use crate::work::{Task, Worker};

use command::{Command, Envelope, Source};
use executor::{Executor, Shared};

pub use context::WorkerContext;

/// Errors returned by coordinator operations
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("worker registered twice: {0}")]
    DuplicateWorker(String),

    #[error(transparent)]
    IllegalTransition(#[from] TransitionError),

    #[error("no task available for {0}")]
    TaskRequired(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no tokio runtime: {0}")]
    Runtime(String),

    #[error("shutdown timeout")]
    ShutdownTimeout,

    #[error("coordinator is shut down")]
    Closed,
}

/// Outcome of a command issued to every worker
pub type PoolOutcome = Vec<(Identity, Result<Status, CoordinatorError>)>;

struct WorkerHandle {
    context: Arc<WorkerContext>,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Builds one policy instance per worker
type PolicyFactory = Box<dyn Fn() -> Box<dyn WorkPolicy> + Send + Sync>;

/// Builder for a [`Coordinator`]
pub struct CoordinatorBuilder {
    workers: Vec<Worker>,
    queue: Option<Arc<dyn Queue>>,
    sinks: Vec<Arc<dyn EventSink>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    policies: Vec<PolicyFactory>,
    config: CoordinatorConfig,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self {
            workers: vec![],
            queue: None,
            sinks: vec![Arc::new(TracingSink)],
            scheduler: None,
            policies: vec![],
            config: CoordinatorConfig::default(),
        }
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker
    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    /// Register several workers
    pub fn with_workers(mut self, workers: impl IntoIterator<Item = Worker>) -> Self {
        self.workers.extend(workers);
        self
    }

    /// Pull tasks from `queue` when an action supplies [`Task::Empty`]
    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Add an event sink next to the default tracing sink
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replace all event sinks
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Use a custom scheduler instead of a dedicated timer runtime
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Check a policy before every work call
    ///
    /// `make` runs once per worker so each worker gets its own instance.
    ///
    /// ```ignore
    /// Coordinator::builder()
    ///     .with_policy(|| RunLimit::new(100))
    ///     .with_policy(|| ErrorRatio::new(0.5).with_min_runs(20));
    /// ```
    pub fn with_policy<P, F>(mut self, make: F) -> Self
    where
        P: WorkPolicy + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.policies.push(Box::new(move || Box::new(make()) as Box<dyn WorkPolicy>));
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the registry and spawn one command loop per worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Coordinator, CoordinatorError> {
        self.config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| CoordinatorError::Runtime(e.to_string()))?;

        let target = self
            .queue
            .as_ref()
            .map(|q| q.name().to_string())
            .unwrap_or_else(|| NO_QUEUE.to_string());
        let notifier = Notifier::new(self.sinks, target);

        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TimerScheduler::new(self.config.scheduler_threads)?),
        };

        let shared = Arc::new(Shared {
            scheduler,
            queue: self.queue,
            config: self.config,
            notifier: notifier.clone(),
        });

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut workers = HashMap::with_capacity(self.workers.len());
        let mut ids = Vec::with_capacity(self.workers.len());

        for worker in self.workers {
            let id = worker.id().clone();
            if workers.contains_key(&id) {
                cancel.cancel();
                return Err(CoordinatorError::DuplicateWorker(id.id()));
            }

            let recorder = Recorder::new(id.clone(), notifier.clone());
            let worker = Arc::new(worker.with_notifier(notifier.clone()));
            let policies = self.policies.iter().map(|make| make()).collect();
            let context = Arc::new(
                WorkerContext::new(worker, shared.config.backoffs(), recorder)
                    .with_policies(policies),
            );

            let (tx, rx) = mpsc::unbounded_channel();
            let executor = Executor::new(Arc::clone(&context), Arc::clone(&shared), tx.clone());
            tracker.spawn(executor.run(rx, cancel.clone()));

            ids.push(id.clone());
            workers.insert(id, WorkerHandle { context, tx });
        }

        info!(
            workers = ids.len(),
            target = shared.notifier.target(),
            "Coordinator built"
        );

        Ok(Coordinator {
            workers,
            ids,
            shared,
            cancel,
            tracker,
        })
    }
}

/// Registry of workers keyed by [`Identity`]
///
/// Every operation is funneled through the target worker's command channel,
/// so commands for one worker apply in submission order while different
/// workers proceed independently. Operations return the worker's status once
/// the command has been applied. A work or hook error moves only that worker
/// to [`Status::Failed`] and is reported as `Ok(Status::Failed)`.
pub struct Coordinator {
    workers: HashMap<Identity, WorkerHandle>,
    ids: Vec<Identity>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Start the worker, then request a first round of work
    ///
    /// With `require_task`, the start is rejected when no task is supplied
    /// and none can be pulled from the queue.
    #[instrument(skip(self, id, task), fields(worker = %id))]
    pub async fn start(
        &self,
        id: &Identity,
        task: Task,
        require_task: bool,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Start {
                task,
                require_task,
                source: Source::Caller,
                guard: None,
            },
        )
        .await
    }

    /// Ask the worker to perform one unit of work
    #[instrument(skip(self, id, task), fields(worker = %id))]
    pub async fn process(&self, id: &Identity, task: Task) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Process {
                task,
                source: Source::Caller,
                pulled: false,
            },
        )
        .await
    }

    /// Resume a paused worker and request one round of work
    #[instrument(skip(self, id, task), fields(worker = %id))]
    pub async fn resume(
        &self,
        id: &Identity,
        reason: Option<&str>,
        task: Task,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Resume {
                reason: reason.unwrap_or("resume").to_string(),
                task,
                source: Source::Caller,
                guard: None,
            },
        )
        .await
    }

    /// Pause the worker and schedule a resume after `delay` (config default if `None`)
    #[instrument(skip(self, id), fields(worker = %id))]
    pub async fn pause(
        &self,
        id: &Identity,
        reason: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Pause {
                reason: reason.unwrap_or("pause").to_string(),
                delay,
            },
        )
        .await
    }

    /// Pause the worker for the next delay of its backoff sequence
    #[instrument(skip(self, id), fields(worker = %id))]
    pub async fn backoff(
        &self,
        id: &Identity,
        reason: Option<&str>,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Backoff {
                reason: reason.unwrap_or("backoff").to_string(),
            },
        )
        .await
    }

    #[instrument(skip(self, id), fields(worker = %id))]
    pub async fn stop(
        &self,
        id: &Identity,
        reason: Option<&str>,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Stop {
                reason: reason.unwrap_or("stop").to_string(),
            },
        )
        .await
    }

    /// Permanently halt the worker; pending timers become no-ops
    #[instrument(skip(self, id), fields(worker = %id))]
    pub async fn kill(
        &self,
        id: &Identity,
        reason: Option<&str>,
    ) -> Result<Status, CoordinatorError> {
        self.dispatch(
            id,
            Command::Kill {
                reason: reason.unwrap_or("kill").to_string(),
            },
        )
        .await
    }

    /// Schedule a start after `delay` without touching the current status
    #[instrument(skip(self, id), fields(worker = %id))]
    pub async fn delay(&self, id: &Identity, delay: Duration) -> Result<Status, CoordinatorError> {
        self.dispatch(id, Command::Delay { delay }).await
    }

    /// Current status, recorded as a `check` event
    pub async fn check(&self, id: &Identity) -> Result<Status, CoordinatorError> {
        self.dispatch(id, Command::Check).await
    }

    pub async fn start_all(&self) -> PoolOutcome {
        self.for_all(|| Command::Start {
            task: Task::Empty,
            require_task: false,
            source: Source::Caller,
            guard: None,
        })
        .await
    }

    pub async fn pause_all(&self, reason: Option<&str>, delay: Option<Duration>) -> PoolOutcome {
        let reason = reason.unwrap_or("pause");
        self.for_all(|| Command::Pause {
            reason: reason.to_string(),
            delay,
        })
        .await
    }

    pub async fn resume_all(&self, reason: Option<&str>) -> PoolOutcome {
        let reason = reason.unwrap_or("resume");
        self.for_all(|| Command::Resume {
            reason: reason.to_string(),
            task: Task::Empty,
            source: Source::Caller,
            guard: None,
        })
        .await
    }

    pub async fn stop_all(&self, reason: Option<&str>) -> PoolOutcome {
        let reason = reason.unwrap_or("stop");
        self.for_all(|| Command::Stop {
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn kill_all(&self, reason: Option<&str>) -> PoolOutcome {
        let reason = reason.unwrap_or("kill");
        self.for_all(|| Command::Kill {
            reason: reason.to_string(),
        })
        .await
    }

    /// Context for a registered worker
    pub fn get(&self, id: &Identity) -> Option<Arc<WorkerContext>> {
        self.workers.get(id).map(|h| Arc::clone(&h.context))
    }

    /// Registered identities, in registration order
    pub fn ids(&self) -> Vec<Identity> {
        self.ids.clone()
    }

    /// Status of a registered worker, read without going through its channel
    pub fn status(&self, id: &Identity) -> Option<Status> {
        self.workers.get(id).map(|h| h.context.status())
    }

    /// Whether every worker reported `Done`
    pub fn is_completed(&self) -> bool {
        self.workers
            .values()
            .all(|h| h.context.status() == Status::Completed)
    }

    /// Every event for every worker from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.notifier.subscribe()
    }

    /// Transition events into `status`, for every worker, from now on
    ///
    /// Events dropped while the subscriber lagged are skipped. The stream
    /// ends once the coordinator is dropped.
    pub fn subscribe_status(&self, status: Status) -> BoxStream<'static, Event> {
        let name = Events::transition_name(status);
        stream::unfold((self.subscribe(), name), |(mut rx, name)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.name == name => return Some((event, (rx, name))),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, %name, "Status subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop all command loops and the timer runtime
    ///
    /// Waits for in-flight commands up to the configured timeout. Pending
    /// timers are discarded; later operations return [`CoordinatorError::Closed`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        info!(workers = self.ids.len(), "Initiating graceful shutdown");
        self.cancel.cancel();
        self.tracker.close();
        self.shared.scheduler.shutdown();

        let timeout = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "Shutdown timeout reached");
            return Err(CoordinatorError::ShutdownTimeout);
        }

        info!("Coordinator stopped");
        Ok(())
    }

    async fn dispatch(&self, id: &Identity, command: Command) -> Result<Status, CoordinatorError> {
        let handle = self
            .workers
            .get(id)
            .ok_or_else(|| CoordinatorError::WorkerNotFound(id.id()))?;
        if self.cancel.is_cancelled() {
            return Err(CoordinatorError::Closed);
        }

        debug!(worker = %id, action = %command.action(), "Dispatching command");
        let (envelope, rx) = Envelope::with_reply(command);
        handle
            .tx
            .send(envelope)
            .map_err(|_| CoordinatorError::Closed)?;
        rx.await.map_err(|_| CoordinatorError::Closed)?
    }

    async fn for_all<F>(&self, make: F) -> PoolOutcome
    where
        F: Fn() -> Command,
    {
        let calls = self.ids.iter().map(|id| {
            let command = make();
            async move { (id.clone(), self.dispatch(id, command).await) }
        });
        join_all(calls).await
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.scheduler.shutdown();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.ids.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::WorkResult;

    fn quiet() -> CoordinatorBuilder {
        Coordinator::builder().with_sinks(vec![])
    }

    #[tokio::test]
    async fn test_build_requires_unique_ids() {
        let id = Identity::test("dup");
        let result = quiet()
            .with_worker(Worker::new(id.clone()))
            .with_worker(Worker::new(id))
            .build();
        assert!(matches!(result, Err(CoordinatorError::DuplicateWorker(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = quiet()
            .with_config(CoordinatorConfig::default().with_backoff_seconds(vec![]))
            .build();
        assert!(matches!(
            result,
            Err(CoordinatorError::Config(ConfigError::EmptyBackoff))
        ));
    }

    #[test]
    fn test_build_outside_runtime() {
        let result = quiet().build();
        assert!(matches!(result, Err(CoordinatorError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let coordinator = quiet().build().unwrap();
        let err = coordinator
            .check(&Identity::test("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkerNotFound(_)));
    }

    #[tokio::test]
    async fn test_registry_is_fixed_and_ordered() {
        let a = Identity::test("a");
        let b = Identity::test("b");
        let coordinator = quiet()
            .with_workers([Worker::new(a.clone()), Worker::new(b.clone())])
            .build()
            .unwrap();

        assert_eq!(coordinator.ids(), vec![a.clone(), b]);
        let ctx = coordinator.get(&a).unwrap();
        assert_eq!(ctx.id(), &a);
        assert_eq!(ctx.status(), Status::InActive);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_are_closed() {
        let id = Identity::test("closed");
        let coordinator = quiet()
            .with_worker(Worker::from_fn(id.clone(), |_| async { Ok(WorkResult::Done) }))
            .build()
            .unwrap();

        coordinator.shutdown().await.unwrap();
        assert!(coordinator.is_closed());
        assert!(matches!(
            coordinator.start(&id, Task::Empty, false).await,
            Err(CoordinatorError::Closed)
        ));
        // Idempotent
        coordinator.shutdown().await.unwrap();
    }
}
