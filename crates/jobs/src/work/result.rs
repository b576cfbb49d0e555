//! Outcomes reported by one invocation of a worker

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a single work invocation
///
/// Never stored; the coordinator interprets it immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkResult {
    /// Worker could not tell
    Unknown,
    /// All work finished
    Done,
    /// More work is available right away
    More,
    /// Unit of work failed
    Fail,
    /// Worker asks to stop
    Stop,
    /// Paged progress: continue from `offset`
    Next {
        offset: i64,
        processed: i64,
        reference: String,
    },
}

impl WorkResult {
    /// Paged continuation
    pub fn next(offset: i64, processed: i64, reference: impl Into<String>) -> Self {
        Self::Next {
            offset,
            processed,
            reference: reference.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Done => "done",
            Self::More => "more",
            Self::Fail => "fail",
            Self::Stop => "stop",
            Self::Next { .. } => "next",
        }
    }

    /// Whether the coordinator should issue a follow-up `Process` command
    pub fn wants_more(&self) -> bool {
        matches!(self, Self::More | Self::Next { .. })
    }

    /// Whether a queue-sourced task should be acknowledged
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::More | Self::Next { .. })
    }
}

impl fmt::Display for WorkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next {
                offset,
                processed,
                reference,
            } => write!(f, "next(offset={offset}, processed={processed}, ref={reference})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_more() {
        assert!(WorkResult::More.wants_more());
        assert!(WorkResult::next(20, 10, "page-2").wants_more());
        assert!(!WorkResult::Done.wants_more());
        assert!(!WorkResult::Fail.wants_more());
        assert!(!WorkResult::Stop.wants_more());
        assert!(!WorkResult::Unknown.wants_more());
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkResult::Done.to_string(), "done");
        assert_eq!(
            WorkResult::next(1, 2, "r").to_string(),
            "next(offset=1, processed=2, ref=r)"
        );
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&WorkResult::next(5, 5, "x")).unwrap();
        assert!(json.contains("\"type\":\"next\""));
        let parsed: WorkResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, WorkResult::next(5, 5, "x"));
    }
}
