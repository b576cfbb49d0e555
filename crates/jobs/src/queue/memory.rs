//! In-memory implementation of Queue for testing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::source::{Queue, QueueError};
use crate::work::{Task, TaskItem};

/// FIFO queue held in memory
///
/// # Example
///
/// ```
/// use workcrew_jobs::{InMemoryQueue, TaskItem};
///
/// let queue = InMemoryQueue::new("emails");
/// queue.push(TaskItem::new("welcome", serde_json::json!({"to": "a@b.c"})));
/// assert_eq!(queue.len(), 1);
/// ```
pub struct InMemoryQueue {
    name: String,
    items: Mutex<VecDeque<TaskItem>>,
    abandoned_items: Mutex<Vec<TaskItem>>,
    completed: AtomicU64,
    abandoned: AtomicU64,
    requeue_abandoned: bool,
}

impl InMemoryQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            abandoned_items: Mutex::new(Vec::new()),
            completed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            requeue_abandoned: false,
        }
    }

    /// Put abandoned tasks back at the end of the queue
    pub fn with_requeue(mut self, requeue: bool) -> Self {
        self.requeue_abandoned = requeue;
        self
    }

    pub fn push(&self, item: TaskItem) {
        self.items.lock().push_back(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = TaskItem>) {
        self.items.lock().extend(items);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Tasks acknowledged as complete
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Tasks abandoned
    pub fn abandoned_count(&self) -> u64 {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Copies of abandoned tasks (not requeued ones)
    pub fn abandoned_items(&self) -> Vec<TaskItem> {
        self.abandoned_items.lock().clone()
    }

    fn item_of(task: &Task) -> Result<&TaskItem, QueueError> {
        task.as_item()
            .ok_or_else(|| QueueError::UnknownTask(format!("{task:?}")))
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next(&self) -> Result<Option<Task>, QueueError> {
        Ok(self.items.lock().pop_front().map(Task::Item))
    }

    async fn next_batch(&self, size: usize) -> Result<Vec<Task>, QueueError> {
        let mut items = self.items.lock();
        let take = size.min(items.len());
        Ok(items.drain(..take).map(Task::Item).collect())
    }

    async fn complete(&self, task: &Task) -> Result<(), QueueError> {
        Self::item_of(task)?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abandon(&self, task: &Task) -> Result<(), QueueError> {
        let item = Self::item_of(task)?.clone();
        self.abandoned.fetch_add(1, Ordering::SeqCst);
        if self.requeue_abandoned {
            self.items.lock().push_back(item);
        } else {
            self.abandoned_items.lock().push(item);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("completed", &self.completed_count())
            .field("abandoned", &self.abandoned_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(n: i64) -> TaskItem {
        TaskItem::new("job", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryQueue::new("q");
        queue.extend([item(1), item(2)]);

        let first = queue.next().await.unwrap().unwrap();
        assert_eq!(first.as_item().unwrap().data, json!({ "n": 1 }));
        let second = queue.next().await.unwrap().unwrap();
        assert_eq!(second.as_item().unwrap().data, json!({ "n": 2 }));
        assert!(queue.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_batch_takes_at_most_size() {
        let queue = InMemoryQueue::new("q");
        queue.extend((0..5).map(item));

        assert_eq!(queue.next_batch(3).await.unwrap().len(), 3);
        assert_eq!(queue.next_batch(3).await.unwrap().len(), 2);
        assert!(queue.next_batch(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledgements() {
        let queue = InMemoryQueue::new("q");
        queue.extend([item(1), item(2)]);

        let a = queue.next().await.unwrap().unwrap();
        let b = queue.next().await.unwrap().unwrap();
        queue.complete(&a).await.unwrap();
        queue.abandon(&b).await.unwrap();

        assert_eq!(queue.completed_count(), 1);
        assert_eq!(queue.abandoned_count(), 1);
        assert_eq!(queue.abandoned_items().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_abandoned() {
        let queue = InMemoryQueue::new("q").with_requeue(true);
        queue.push(item(1));

        let task = queue.next().await.unwrap().unwrap();
        queue.abandon(&task).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(queue.abandoned_items().is_empty());
    }

    #[tokio::test]
    async fn test_sentinels_are_rejected() {
        let queue = InMemoryQueue::new("q");
        assert!(matches!(
            queue.complete(&Task::Empty).await,
            Err(QueueError::UnknownTask(_))
        ));
    }
}
