//! Queue trait definition

use async_trait::async_trait;

use crate::work::Task;

/// Errors from queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue cannot be reached
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The task was not handed out by this queue
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Other error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Pull-style source of tasks
///
/// Every task handed out by [`Queue::next`] is later either completed or
/// abandoned by the coordinator. Acknowledgement errors are logged by the
/// caller and never change worker status.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Name used as the event target (e.g. `queue://emails`)
    fn name(&self) -> &str;

    /// Next task, `None` when the queue is empty
    async fn next(&self) -> Result<Option<Task>, QueueError>;

    /// Up to `size` tasks
    async fn next_batch(&self, size: usize) -> Result<Vec<Task>, QueueError>;

    /// Acknowledge a processed task
    async fn complete(&self, task: &Task) -> Result<(), QueueError>;

    /// Give up on a task
    async fn abandon(&self, task: &Task) -> Result<(), QueueError>;
}
