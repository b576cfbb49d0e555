//! Workers: the work function plus its own status cell

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Task, WorkResult};
use crate::events::{Events, Notifier};
use crate::identity::Identity;
use crate::status::{Status, TransitionError};

/// Error raised by a work function or lifecycle hook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl WorkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            details: None,
        }
    }

    /// Error built from a caught panic payload
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::new(format!("panicked: {message}")).with_type("panic")
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for WorkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkError {}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The work a worker performs, plus optional lifecycle hooks
///
/// # Example
///
/// ```ignore
/// struct PagedImport { pages: AtomicI64 }
///
/// #[async_trait]
/// impl WorkHandler for PagedImport {
///     async fn work(&self, _task: Task) -> Result<WorkResult, WorkError> {
///         let page = self.pages.fetch_add(1, Ordering::SeqCst);
///         if page >= 10 {
///             return Ok(WorkResult::Done);
///         }
///         import_page(page).await?;
///         Ok(WorkResult::next(page + 1, 100, "customers"))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Perform one unit of work
    async fn work(&self, task: Task) -> Result<WorkResult, WorkError>;

    async fn on_start(&self) -> Result<(), WorkError> {
        Ok(())
    }

    async fn on_pause(&self, _reason: &str) -> Result<(), WorkError> {
        Ok(())
    }

    async fn on_resume(&self, _reason: &str) -> Result<(), WorkError> {
        Ok(())
    }

    async fn on_stop(&self, _reason: &str) -> Result<(), WorkError> {
        Ok(())
    }

    async fn on_kill(&self, _reason: &str) -> Result<(), WorkError> {
        Ok(())
    }

    async fn on_complete(&self) -> Result<(), WorkError> {
        Ok(())
    }

    /// Called after the worker moved to `Failed`; cannot fail itself
    async fn on_fail(&self, _error: &WorkError) {}

    /// Key/value diagnostics included in transition events
    fn info(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// Boxed work function
pub type WorkFn = Arc<
    dyn Fn(Task) -> Pin<Box<dyn Future<Output = Result<WorkResult, WorkError>> + Send>>
        + Send
        + Sync,
>;

/// Adapts a closure into a [`WorkHandler`] with no-op hooks
struct FnHandler {
    operation: WorkFn,
}

#[async_trait]
impl WorkHandler for FnHandler {
    async fn work(&self, task: Task) -> Result<WorkResult, WorkError> {
        (self.operation)(task).await
    }
}

#[derive(Debug, Clone)]
struct StatusCell {
    status: Status,
    note: String,
}

/// A long-lived worker
///
/// Holds the work function and its own status cell. [`Worker::move_to`] is
/// the only way to change status; every accepted move is checked against the
/// state machine under the cell's lock, so concurrent moves are linearizable.
pub struct Worker {
    id: Identity,
    handler: Option<Arc<dyn WorkHandler>>,
    cell: Mutex<StatusCell>,
    notifier: Notifier,
}

impl Worker {
    /// Worker without a work function: every invocation reports `Done`
    pub fn new(id: Identity) -> Self {
        Self {
            id,
            handler: None,
            cell: Mutex::new(StatusCell {
                status: Status::InActive,
                note: Status::InActive.to_string(),
            }),
            notifier: Notifier::default(),
        }
    }

    /// Worker backed by a handler
    pub fn with_handler(id: Identity, handler: Arc<dyn WorkHandler>) -> Self {
        Self {
            handler: Some(handler),
            ..Self::new(id)
        }
    }

    /// Worker backed by an async closure
    pub fn from_fn<F, Fut>(id: Identity, operation: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkResult, WorkError>> + Send + 'static,
    {
        let operation: WorkFn = Arc::new(move |task| Box::pin(operation(task)));
        Self::with_handler(id, Arc::new(FnHandler { operation }))
    }

    /// Replace the notifier used for transition events
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn id(&self) -> &Identity {
        &self.id
    }

    pub fn status(&self) -> Status {
        self.cell.lock().status
    }

    /// Reason recorded with the latest transition
    pub fn note(&self) -> String {
        self.cell.lock().note.clone()
    }

    /// Handler diagnostics; empty if the handler has none or its `info` panics
    pub fn info(&self) -> Vec<(String, String)> {
        let Some(handler) = &self.handler else {
            return vec![];
        };
        match catch_unwind(AssertUnwindSafe(|| handler.info())) {
            Ok(info) => info,
            Err(panic) => {
                let error = WorkError::panicked(panic.as_ref());
                warn!(worker = %self.id, error = %error, "Worker info panicked");
                vec![]
            }
        }
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Work from a source the worker manages itself
    pub async fn work(&self) -> Result<WorkResult, WorkError> {
        self.work_on(Task::Owned).await
    }

    /// Work on a supplied task
    pub async fn work_on(&self, task: Task) -> Result<WorkResult, WorkError> {
        match &self.handler {
            None => Ok(WorkResult::Done),
            Some(handler) => handler.work(task).await,
        }
    }

    /// Move to `status` and notify
    pub fn move_to(&self, status: Status, note: Option<&str>) -> Result<Status, TransitionError> {
        self.transition(status, note, true, vec![])
    }

    /// Move to `status` and notify with extra event fields (e.g. the task being worked)
    pub fn move_with(
        &self,
        status: Status,
        note: Option<&str>,
        fields: Vec<(String, String)>,
    ) -> Result<Status, TransitionError> {
        self.transition(status, note, true, fields)
    }

    /// Move to `status` without sending a notification
    pub fn move_quietly(
        &self,
        status: Status,
        note: Option<&str>,
    ) -> Result<Status, TransitionError> {
        self.transition(status, note, false, vec![])
    }

    /// Returns the previous status
    fn transition(
        &self,
        status: Status,
        note: Option<&str>,
        notify: bool,
        mut fields: Vec<(String, String)>,
    ) -> Result<Status, TransitionError> {
        let note = note.unwrap_or(status.as_str()).to_string();
        let previous = {
            let mut cell = self.cell.lock();
            let from = cell.status;
            if !from.can_move_to(status) {
                return Err(TransitionError::IllegalMove { from, to: status });
            }
            cell.status = status;
            cell.note = note.clone();
            from
        };

        if notify {
            fields.extend(self.info());
            let event = Events::transition(
                &self.id,
                previous,
                status,
                &note,
                self.notifier.target(),
                fields,
            );
            self.notifier.notify(event);
        }
        Ok(previous)
    }

    pub(crate) async fn started(&self) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_start().await,
            None => Ok(()),
        }
    }

    pub(crate) async fn paused(&self, reason: &str) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_pause(reason).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn resumed(&self, reason: &str) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_resume(reason).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn stopped(&self, reason: &str) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_stop(reason).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn killed(&self, reason: &str) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_kill(reason).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn completed(&self) -> Result<(), WorkError> {
        match &self.handler {
            Some(h) => h.on_complete().await,
            None => Ok(()),
        }
    }

    pub(crate) async fn failed(&self, error: &WorkError) {
        if let Some(h) = &self.handler {
            h.on_fail(error).await;
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id.id())
            .field("status", &self.status())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_without_operation_is_done() {
        let worker = Worker::new(Identity::test("noop"));
        assert_eq!(worker.work().await.unwrap(), WorkResult::Done);
        assert_eq!(worker.work_on(Task::Empty).await.unwrap(), WorkResult::Done);
    }

    #[tokio::test]
    async fn test_from_fn_receives_task() {
        let worker = Worker::from_fn(Identity::test("fn"), |task: Task| async move {
            match task {
                Task::Owned => Ok(WorkResult::More),
                _ => Ok(WorkResult::Fail),
            }
        });
        assert_eq!(worker.work().await.unwrap(), WorkResult::More);
        assert_eq!(worker.work_on(Task::Empty).await.unwrap(), WorkResult::Fail);
    }

    #[test]
    fn test_move_to_follows_state_machine() {
        let worker = Worker::new(Identity::test("moves")).with_notifier(Notifier::silent());
        assert_eq!(worker.status(), Status::InActive);

        assert_eq!(worker.move_to(Status::Started, None), Ok(Status::InActive));
        assert_eq!(worker.move_to(Status::Running, Some("go")), Ok(Status::Started));
        assert_eq!(worker.note(), "go");

        // Illegal: Running -> Started
        let err = worker.move_to(Status::Started, None).unwrap_err();
        assert_eq!(
            err,
            TransitionError::IllegalMove {
                from: Status::Running,
                to: Status::Started
            }
        );
        assert_eq!(worker.status(), Status::Running);
        assert_eq!(worker.note(), "go");
    }

    #[test]
    fn test_move_notifies_unless_quiet() {
        let notifier = Notifier::silent();
        let mut rx = notifier.subscribe();
        let worker = Worker::new(Identity::test("notify")).with_notifier(notifier);

        worker.move_to(Status::Started, None).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.status, Status::Started);
        assert_eq!(event.field("from"), Some("InActive"));

        worker.move_quietly(Status::Running, None).unwrap();
        assert!(rx.try_recv().is_err());
    }

    struct BrokenInfo;

    #[async_trait]
    impl WorkHandler for BrokenInfo {
        async fn work(&self, _task: Task) -> Result<WorkResult, WorkError> {
            Ok(WorkResult::Done)
        }

        fn info(&self) -> Vec<(String, String)> {
            panic!("info unavailable")
        }
    }

    #[test]
    fn test_panicking_info_does_not_block_moves() {
        let notifier = Notifier::silent();
        let mut rx = notifier.subscribe();
        let worker = Worker::with_handler(Identity::test("info"), Arc::new(BrokenInfo))
            .with_notifier(notifier);

        assert!(worker.info().is_empty());
        assert_eq!(worker.move_to(Status::Started, None), Ok(Status::InActive));
        assert_eq!(worker.status(), Status::Started);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.status, Status::Started);
        assert_eq!(event.fields.len(), 2);
    }

    #[test]
    fn test_move_with_adds_fields() {
        let notifier = Notifier::silent();
        let mut rx = notifier.subscribe();
        let worker = Worker::new(Identity::test("fields")).with_notifier(notifier);

        let task = Task::Owned;
        worker
            .move_with(Status::Started, Some("start"), task.structured())
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.field("note"), Some("start"));
        assert_eq!(event.field("task"), Some("owned"));
    }

    #[test]
    fn test_killed_accepts_nothing_else() {
        let worker = Worker::new(Identity::test("kill")).with_notifier(Notifier::silent());
        worker.move_to(Status::Killed, None).unwrap();
        for status in Status::ALL {
            if status != Status::Killed {
                assert!(worker.move_to(status, None).is_err());
            }
        }
        assert_eq!(worker.status(), Status::Killed);
    }

    #[test]
    fn test_panic_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("bad state");
        let err = WorkError::panicked(payload.as_ref());
        assert_eq!(err.message, "panicked: bad state");
        assert_eq!(err.error_type.as_deref(), Some("panic"));
    }
}
