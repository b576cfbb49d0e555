//! Units of work handed to a worker

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of a concrete task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Unique task id
    pub id: String,

    /// Where the task came from (e.g. a queue name)
    pub from: String,

    /// Name of the job the task belongs to
    pub job: String,

    /// Task name / type
    pub name: String,

    /// Arbitrary payload
    pub data: serde_json::Value,

    /// External correlation id
    #[serde(default)]
    pub xid: String,

    /// Free-form tag
    #[serde(default)]
    pub tag: String,
}

impl TaskItem {
    /// Create a task with a generated id
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            from: String::new(),
            job: String::new(),
            name: name.into(),
            data,
            xid: String::new(),
            tag: String::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_xid(mut self, xid: impl Into<String>) -> Self {
        self.xid = xid.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

/// A unit of work
///
/// `Empty` and `Owned` are sentinels: `Empty` means no task (signal-driven
/// work), `Owned` means the worker pulls from a source it manages itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    #[default]
    Empty,
    Owned,
    Item(TaskItem),
}

impl Task {
    /// Wrap a payload
    pub fn item(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Item(TaskItem::new(name, data))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned)
    }

    /// The payload, if this is a concrete task
    pub fn as_item(&self) -> Option<&TaskItem> {
        match self {
            Self::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Key/value pairs for structured logs
    pub fn structured(&self) -> Vec<(String, String)> {
        match self {
            Self::Empty => vec![("task".to_string(), "empty".to_string())],
            Self::Owned => vec![("task".to_string(), "owned".to_string())],
            Self::Item(item) => vec![
                ("task_id".to_string(), item.id.clone()),
                ("task_name".to_string(), item.name.clone()),
                ("task_from".to_string(), item.from.clone()),
                ("task_job".to_string(), item.job.clone()),
                ("task_xid".to_string(), item.xid.clone()),
                ("task_tag".to_string(), item.tag.clone()),
            ],
        }
    }
}

impl From<TaskItem> for Task {
    fn from(item: TaskItem) -> Self {
        Self::Item(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sentinels() {
        assert!(Task::default().is_empty());
        assert!(Task::Owned.is_owned());
        assert!(Task::Empty.as_item().is_none());
    }

    #[test]
    fn test_structured_fields() {
        let task: Task = TaskItem::new("send_email", json!({"to": "a@b.c"}))
            .with_id("t-1")
            .with_from("queue://emails")
            .with_tag("signup")
            .into();

        let fields = task.structured();
        assert!(fields.contains(&("task_id".to_string(), "t-1".to_string())));
        assert!(fields.contains(&("task_from".to_string(), "queue://emails".to_string())));
        assert!(fields.contains(&("task_tag".to_string(), "signup".to_string())));

        assert_eq!(
            Task::Empty.structured(),
            vec![("task".to_string(), "empty".to_string())]
        );
    }

    #[test]
    fn test_serialization_tags_kind() {
        let json = serde_json::to_string(&Task::Owned).unwrap();
        assert_eq!(json, r#"{"kind":"owned"}"#);

        let task = Task::item("n", json!({"k": 1}));
        let parsed: Task = serde_json::from_str(&serde_json::to_string(&task).unwrap()).unwrap();
        assert_eq!(task, parsed);
    }
}
