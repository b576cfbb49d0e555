//! # Workcrew Jobs
//!
//! Coordination engine for pools of long-lived workers.
//!
//! ## Features
//!
//! - **Validated lifecycle**: every status change is checked against a fixed state machine
//! - **Serialized commands**: one command channel per worker, no overlapping work calls
//! - **Pause, backoff and delay**: timers run on a dedicated runtime and re-check state when they fire
//! - **Failure isolation**: a failing or panicking worker moves to `Failed` alone
//! - **Run policies**: run limits and error ratios pause or stop a worker before its next call
//! - **Structured events**: every transition becomes an [`Event`] for sinks and subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Coordinator                            │
//! │  (registry of WorkerContexts, one command loop per worker)  │
//! └─────────────────────────────────────────────────────────────┘
//!           │                    │                     │
//!           ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ Worker           │ │ Scheduler        │ │ Queue            │
//! │ (work + status)  │ │ (timer runtime)  │ │ (task source)    │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!           │
//!           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Notifier ──► EventSinks / subscribers           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workcrew_jobs::prelude::*;
//!
//! let queue = Arc::new(InMemoryQueue::new("emails"));
//! let id = Identity::worker("signup", "emails", "dev");
//! let worker = Worker::from_fn(id.clone(), |task| async move {
//!     send_email(task.as_item()).await?;
//!     Ok(WorkResult::More)
//! });
//!
//! let coordinator = Coordinator::builder()
//!     .with_worker(worker)
//!     .with_queue(queue)
//!     .build()?;
//!
//! coordinator.start(&id, Task::Empty, false).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod events;
pub mod identity;
pub mod queue;
pub mod reliability;
pub mod scheduler;
pub mod status;
pub mod work;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, CoordinatorConfig};
    pub use crate::coordinator::{Coordinator, CoordinatorBuilder, CoordinatorError, WorkerContext};
    pub use crate::events::{ChannelSink, Event, EventSink, Notifier, Recorder, TracingSink};
    pub use crate::identity::{Agent, Identity};
    pub use crate::queue::{InMemoryQueue, Queue, QueueError};
    pub use crate::reliability::{Backoffs, ErrorRatio, PolicyDecision, RunLimit, WorkPolicy};
    pub use crate::scheduler::{Scheduler, SchedulerError, TimerScheduler};
    pub use crate::status::{Action, Status, TransitionError};
    pub use crate::work::{Task, TaskItem, WorkError, WorkHandler, WorkResult, Worker};
}

// Re-export key types at crate root
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorError, PoolOutcome, WorkerContext,
};
pub use events::{
    ChannelSink, Event, EventSink, Events, Notifier, Recorder, RecorderStats, ResultCounts,
    TracingSink, NO_QUEUE,
};
pub use identity::{Agent, Identity};
pub use queue::{InMemoryQueue, Queue, QueueError};
pub use reliability::{Backoffs, ErrorRatio, PolicyDecision, RunLimit, WorkPolicy};
pub use scheduler::{Scheduler, SchedulerError, TimerScheduler};
pub use status::{Action, Status, TransitionError};
pub use work::{Task, TaskItem, WorkError, WorkFn, WorkHandler, WorkResult, Worker};
