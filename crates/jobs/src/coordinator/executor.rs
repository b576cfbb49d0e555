//! Per-worker command loop
//!
//! Each worker gets one task that drains its command channel and runs one
//! command at a time, so no two work invocations for the same worker ever
//! overlap. `More` / `Next` results and timers feed new commands back into
//! the same channel instead of recursing.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::command::{Command, Envelope, Guard, Source};
use super::context::WorkerContext;
use super::CoordinatorError;
use crate::config::CoordinatorConfig;
use crate::events::{Events, Notifier};
use crate::queue::Queue;
use crate::reliability::{Backoffs, PolicyDecision};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::status::{validate, Action, Status};
use crate::work::{Task, WorkError, WorkResult};

/// Collaborators shared by every worker loop
pub(crate) struct Shared {
    pub scheduler: Arc<dyn Scheduler>,
    pub queue: Option<Arc<dyn Queue>>,
    pub config: CoordinatorConfig,
    pub notifier: Notifier,
}

/// Run a work call or hook, turning a panic into a [`WorkError`]
async fn guarded<T, F>(fut: F) -> Result<T, WorkError>
where
    F: Future<Output = Result<T, WorkError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(WorkError::panicked(panic.as_ref())),
    }
}

pub(crate) struct Executor {
    ctx: Arc<WorkerContext>,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Executor {
    pub(crate) fn new(
        ctx: Arc<WorkerContext>,
        shared: Arc<Shared>,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self { ctx, shared, tx }
    }

    /// Drain commands until shutdown
    pub(crate) async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
    ) {
        debug!(worker = %self.ctx.id(), "Command loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(worker = %self.ctx.id(), "Command loop: shutdown requested");
                    break;
                }
                envelope = rx.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }

        debug!(worker = %self.ctx.id(), "Command loop exited");
    }

    async fn handle(&self, envelope: Envelope) {
        let Envelope { command, reply } = envelope;
        let action = command.action();
        let source = command.source();
        trace!(worker = %self.ctx.id(), %action, source = source.as_str(), "Handling command");

        let outcome = self.execute(command).await;

        match reply {
            Some(reply) => {
                // Caller gave up waiting
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    debug!(
                        worker = %self.ctx.id(),
                        %action,
                        source = source.as_str(),
                        error = %e,
                        "Detached command rejected"
                    );
                }
            }
        }
    }

    async fn execute(&self, command: Command) -> Result<Status, CoordinatorError> {
        match command {
            Command::Start {
                task,
                require_task,
                source,
                guard,
            } => self.start(task, require_task, source, guard).await,
            Command::Process {
                task,
                source,
                pulled,
            } => self.process(task, source, pulled).await,
            Command::Resume {
                reason,
                task,
                source,
                guard,
            } => self.resume(&reason, task, source, guard).await,
            Command::Pause { reason, delay } => self.pause(&reason, delay).await,
            Command::Backoff { reason } => self.backoff(&reason, vec![]).await,
            Command::Stop { reason } => self.stop(&reason).await,
            Command::Kill { reason } => self.kill(&reason).await,
            Command::Delay { delay } => self.delay(delay),
            Command::Check => self.check(),
        }
    }

    async fn start(
        &self,
        task: Task,
        require_task: bool,
        source: Source,
        guard: Option<Guard>,
    ) -> Result<Status, CoordinatorError> {
        if self.is_stale(guard) {
            debug!(worker = %self.ctx.id(), source = source.as_str(), "Scheduled start is stale, skipping");
            return Ok(self.ctx.status());
        }
        validate(Action::Start, self.ctx.status())?;

        let (task, pulled) = self.obtain(task).await;
        if require_task && task.is_empty() {
            return Err(CoordinatorError::TaskRequired(self.ctx.id().id()));
        }

        info!(worker = %self.ctx.id(), source = source.as_str(), "Starting worker");
        let worker = self.ctx.worker();
        worker.move_with(Status::Started, Some("start"), task.structured())?;

        if let Err(e) = guarded(worker.started()).await {
            if pulled {
                self.abandon(&task).await;
            }
            return Ok(self.fail(Action::Start, e, task.structured()).await);
        }

        worker.move_with(Status::Running, Some("start"), task.structured())?;
        self.enqueue(Command::continuation(task, pulled));
        Ok(self.ctx.status())
    }

    async fn process(
        &self,
        task: Task,
        source: Source,
        pulled: bool,
    ) -> Result<Status, CoordinatorError> {
        let status = self.ctx.status();
        if !Action::Process.is_allowed(status) {
            if pulled {
                self.abandon(&task).await;
            }
            if source == Source::Caller {
                validate(Action::Process, status)?;
            }
            debug!(worker = %self.ctx.id(), %status, "Worker not running, continuation dropped");
            return Ok(status);
        }

        if let Some((policy, decision)) = self.ctx.consult() {
            if pulled {
                self.abandon(&task).await;
            }
            return self.enforce(policy, decision).await;
        }

        let (task, pulled) = if task.is_empty() {
            self.obtain(task).await
        } else {
            (task, pulled)
        };

        if self.shared.queue.is_some() {
            if pulled {
                // Work found: an idle backoff starts over next time
                self.ctx.reset_backoff();
            } else if task.is_empty() && self.shared.config.idle_backoff {
                debug!(worker = %self.ctx.id(), "Queue empty, backing off");
                return self.backoff("queue empty", task.structured()).await;
            }
        }

        let work_task = if task.is_empty() && self.shared.queue.is_none() {
            Task::Owned
        } else {
            task.clone()
        };
        trace!(worker = %self.ctx.id(), task = ?work_task.structured(), "Invoking worker");

        match guarded(self.ctx.worker().work_on(work_task)).await {
            Ok(result) => {
                self.ctx.recorder().record_result(&result);
                if pulled {
                    if result.is_success() {
                        self.complete(&task).await;
                    } else {
                        self.abandon(&task).await;
                    }
                }
                self.interpret(result, &task).await
            }
            Err(e) => {
                self.ctx.recorder().record_failure(&e);
                if pulled {
                    self.abandon(&task).await;
                }
                Ok(self.fail(Action::Process, e, task.structured()).await)
            }
        }
    }

    /// Apply a policy's objection to the next work call
    async fn enforce(
        &self,
        policy: &str,
        decision: PolicyDecision,
    ) -> Result<Status, CoordinatorError> {
        match decision {
            PolicyDecision::Proceed => Ok(self.ctx.status()),
            PolicyDecision::Pause { reason, delay } => {
                info!(worker = %self.ctx.id(), policy, reason = %reason, "Policy paused worker");
                self.pause(&reason, delay).await
            }
            PolicyDecision::Stop { reason } => {
                info!(worker = %self.ctx.id(), policy, reason = %reason, "Policy stopped worker");
                self.stop(&reason).await
            }
        }
    }

    /// Act on the result of one work invocation
    async fn interpret(
        &self,
        result: WorkResult,
        task: &Task,
    ) -> Result<Status, CoordinatorError> {
        match result {
            WorkResult::Done => {
                let worker = self.ctx.worker();
                if let Err(e) = guarded(worker.completed()).await {
                    return Ok(self.fail(Action::Process, e, task.structured()).await);
                }
                worker.move_with(Status::Completed, Some("done"), task.structured())?;
                info!(worker = %self.ctx.id(), "Worker completed");
            }
            WorkResult::More | WorkResult::Next { .. } => {
                trace!(worker = %self.ctx.id(), %result, "Continuing");
                self.enqueue(Command::continuation(Task::Empty, false));
            }
            WorkResult::Unknown | WorkResult::Fail | WorkResult::Stop => {
                warn!(worker = %self.ctx.id(), %result, "Unexpected work result, no transition");
            }
        }
        Ok(self.ctx.status())
    }

    async fn resume(
        &self,
        reason: &str,
        task: Task,
        source: Source,
        guard: Option<Guard>,
    ) -> Result<Status, CoordinatorError> {
        if self.is_stale(guard) {
            debug!(worker = %self.ctx.id(), source = source.as_str(), "Scheduled resume is stale, skipping");
            return Ok(self.ctx.status());
        }
        validate(Action::Resume, self.ctx.status())?;

        if source != Source::BackoffTimer {
            self.ctx.reset_backoff();
        }

        info!(worker = %self.ctx.id(), reason, source = source.as_str(), "Resuming worker");
        let worker = self.ctx.worker();
        worker.move_to(Status::Running, Some(reason))?;
        if source == Source::BackoffTimer {
            self.ctx
                .recorder()
                .record(Status::Running, "backoff_finish", vec![]);
        }

        if let Err(e) = guarded(worker.resumed(reason)).await {
            return Ok(self.fail(Action::Resume, e, vec![]).await);
        }

        self.enqueue(Command::continuation(task, false));
        Ok(self.ctx.status())
    }

    async fn pause(
        &self,
        reason: &str,
        delay: Option<Duration>,
    ) -> Result<Status, CoordinatorError> {
        validate(Action::Pause, self.ctx.status())?;
        let delay = delay.unwrap_or(self.shared.config.pause_duration);
        self.halt(Action::Pause, reason, delay, Source::PauseTimer, None)
            .await
    }

    /// `fields` describe the task that triggered an idle backoff, if any
    async fn backoff(
        &self,
        reason: &str,
        fields: Vec<(String, String)>,
    ) -> Result<Status, CoordinatorError> {
        validate(Action::Backoff, self.ctx.status())?;
        let mut cursor = self.ctx.backoffs();
        let delay = cursor.next();
        self.halt(
            Action::Backoff,
            reason,
            delay,
            Source::BackoffTimer,
            Some((cursor, fields)),
        )
        .await
    }

    /// Arm the resume timer, then move to `Paused`
    ///
    /// The generation and the advanced backoff cursor are committed only once
    /// the timer is armed, so a scheduling failure leaves the worker as it was.
    async fn halt(
        &self,
        action: Action,
        reason: &str,
        delay: Duration,
        source: Source,
        backoff: Option<(Backoffs, Vec<(String, String)>)>,
    ) -> Result<Status, CoordinatorError> {
        let generation = self.ctx.generation() + 1;
        let resume = Command::Resume {
            reason: format!("{action} elapsed"),
            task: Task::Empty,
            source,
            guard: Some(Guard {
                expected: Some(Status::Paused),
                generation,
            }),
        };
        let resume_at = self.arm(delay, resume)?;
        self.ctx.bump_generation();

        info!(
            worker = %self.ctx.id(),
            %action,
            reason,
            delay_ms = delay.as_millis() as u64,
            %resume_at,
            "Pausing worker"
        );

        let worker = self.ctx.worker();
        worker.move_to(Status::Paused, Some(reason))?;
        if let Some((cursor, fields)) = backoff {
            self.ctx.store_backoffs(cursor);
            let mut marker = vec![
                ("seconds".to_string(), delay.as_secs().to_string()),
                ("reason".to_string(), reason.to_string()),
            ];
            marker.extend(fields);
            self.ctx.recorder().record(Status::Paused, "backoff_start", marker);
        }

        if let Err(e) = guarded(worker.paused(reason)).await {
            return Ok(self.fail(action, e, vec![]).await);
        }
        Ok(self.ctx.status())
    }

    async fn stop(&self, reason: &str) -> Result<Status, CoordinatorError> {
        validate(Action::Stop, self.ctx.status())?;
        self.ctx.bump_generation();

        info!(worker = %self.ctx.id(), reason, "Stopping worker");
        let worker = self.ctx.worker();
        worker.move_to(Status::Stopped, Some(reason))?;

        if let Err(e) = guarded(worker.stopped(reason)).await {
            return Ok(self.fail(Action::Stop, e, vec![]).await);
        }
        Ok(self.ctx.status())
    }

    async fn kill(&self, reason: &str) -> Result<Status, CoordinatorError> {
        validate(Action::Kill, self.ctx.status())?;
        self.ctx.bump_generation();

        warn!(worker = %self.ctx.id(), reason, "Killing worker");
        let worker = self.ctx.worker();
        worker.move_to(Status::Killed, Some(reason))?;

        // Killed is final: a failing hook is only recorded
        if let Err(e) = guarded(worker.killed(reason)).await {
            self.ctx.recorder().record_error(&e);
            error!(worker = %self.ctx.id(), error = %e, "Kill hook failed");
        }
        Ok(self.ctx.status())
    }

    fn delay(&self, delay: Duration) -> Result<Status, CoordinatorError> {
        let status = self.ctx.status();
        validate(Action::Delay, status)?;

        let start = Command::Start {
            task: Task::Empty,
            require_task: false,
            source: Source::DelayTimer,
            guard: Some(Guard {
                expected: None,
                generation: self.ctx.generation(),
            }),
        };
        let start_at = self.arm(delay, start)?;

        info!(worker = %self.ctx.id(), %start_at, "Start delayed");
        self.ctx.recorder().record(
            status,
            "delay",
            vec![
                ("seconds".to_string(), delay.as_secs().to_string()),
                ("start_at".to_string(), start_at.to_rfc3339()),
            ],
        );
        Ok(status)
    }

    fn check(&self) -> Result<Status, CoordinatorError> {
        let status = self.ctx.status();
        validate(Action::Check, status)?;

        let notifier = &self.shared.notifier;
        notifier.notify(Events::command(
            self.ctx.id(),
            status,
            Action::Check,
            notifier.target(),
        ));
        Ok(status)
    }

    /// Move to `Failed` after a work or hook error. Returns the resulting status.
    async fn fail(
        &self,
        action: Action,
        error: WorkError,
        fields: Vec<(String, String)>,
    ) -> Status {
        self.ctx.recorder().record_error(&error);
        self.ctx.bump_generation();
        error!(
            worker = %self.ctx.id(),
            %action,
            error = %error,
            error_type = ?error.error_type,
            "Worker failed"
        );

        let worker = self.ctx.worker();
        match worker.move_with(Status::Failed, Some(&error.message), fields) {
            Ok(_) => {
                if AssertUnwindSafe(worker.failed(&error))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    warn!(worker = %self.ctx.id(), "Fail hook panicked");
                }
            }
            Err(e) => {
                warn!(worker = %self.ctx.id(), error = %e, "Could not record failure status");
            }
        }
        self.ctx.status()
    }

    /// Whether a scheduled command no longer matches the worker's state
    fn is_stale(&self, guard: Option<Guard>) -> bool {
        match guard {
            None => false,
            Some(guard) => {
                guard.generation != self.ctx.generation()
                    || guard
                        .expected
                        .is_some_and(|expected| expected != self.ctx.status())
            }
        }
    }

    /// Schedule `command` to be sent to this worker after `delay`
    fn arm(&self, delay: Duration, command: Command) -> Result<DateTime<Utc>, SchedulerError> {
        let tx = self.tx.clone();
        let callback = async move {
            // Loop gone means the coordinator shut down
            let _ = tx.send(Envelope::detached(command));
        }
        .boxed();
        self.shared.scheduler.schedule_after(delay, callback)
    }

    fn enqueue(&self, command: Command) {
        if self.tx.send(Envelope::detached(command)).is_err() {
            debug!(worker = %self.ctx.id(), "Command channel closed, continuation dropped");
        }
    }

    /// Resolve an empty task from the queue. Returns the task and whether it was pulled.
    async fn obtain(&self, task: Task) -> (Task, bool) {
        if !task.is_empty() {
            return (task, false);
        }
        let Some(queue) = &self.shared.queue else {
            return (task, false);
        };
        match queue.next().await {
            Ok(Some(next)) => (next, true),
            Ok(None) => (Task::Empty, false),
            Err(e) => {
                warn!(worker = %self.ctx.id(), queue = queue.name(), error = %e, "Failed to pull task");
                (Task::Empty, false)
            }
        }
    }

    async fn complete(&self, task: &Task) {
        if let Some(queue) = &self.shared.queue {
            if let Err(e) = queue.complete(task).await {
                warn!(worker = %self.ctx.id(), queue = queue.name(), error = %e, "Failed to complete task");
            }
        }
    }

    async fn abandon(&self, task: &Task) {
        if let Some(queue) = &self.shared.queue {
            if let Err(e) = queue.abandon(task).await {
                warn!(worker = %self.ctx.id(), queue = queue.name(), error = %e, "Failed to abandon task");
            }
        }
    }
}
