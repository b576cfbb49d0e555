//! Worker lifecycle states and the rules that gate every action
//!
//! # State Machine
//!
//! ```text
//!             start                 pause/backoff
//! ┌──────────┐     ┌─────────┐    ┌─────────┐ ─────────────► ┌────────┐
//! │ InActive │ ──► │ Started │ ─► │ Running │                │ Paused │
//! └──────────┘     └─────────┘    └─────────┘ ◄───────────── └────────┘
//!                                      │           resume
//!                                      │ Done
//!                                      ▼
//!                                ┌───────────┐
//!                                │ Completed │
//!                                └───────────┘
//!
//! stop: any non-terminal ──► Stopped      error: ──► Failed
//! kill: any ──► Killed (terminal, no restart)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not yet started
    InActive,
    /// Start requested, start hook running
    Started,
    /// Accepting work
    Running,
    /// Temporarily halted, usually with a scheduled resume
    Paused,
    /// Halted until explicitly started again
    Stopped,
    /// Work reported `Done`
    Completed,
    /// A work or lifecycle hook failed
    Failed,
    /// Permanently halted
    Killed,
}

impl Status {
    /// All states in declaration order
    pub const ALL: [Status; 8] = [
        Status::InActive,
        Status::Started,
        Status::Running,
        Status::Paused,
        Status::Stopped,
        Status::Completed,
        Status::Failed,
        Status::Killed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InActive => "InActive",
            Self::Started => "Started",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Killed => "Killed",
        }
    }

    /// Numeric status code used in structured events
    pub fn code(&self) -> i32 {
        match self {
            Self::InActive => 200102,
            Self::Started => 200103,
            Self::Running => 200105,
            Self::Paused => 200106,
            Self::Stopped => 200107,
            Self::Completed => 200108,
            Self::Failed => 500007,
            Self::Killed => 200109,
        }
    }

    /// Completed and Killed never leave (except Completed → Killed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Killed)
    }

    /// Whether a direct move from `self` to `next` is a legal edge
    pub fn can_move_to(&self, next: Status) -> bool {
        use Status::*;
        match (self, next) {
            (_, Killed) => true,
            (InActive, Started | Stopped | Failed) => true,
            (Started, Running | Stopped | Failed) => true,
            (Running, Paused | Stopped | Completed | Failed) => true,
            (Paused, Started | Running | Stopped | Failed) => true,
            (Stopped, Started | Failed) => true,
            (Failed, Started) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control actions that can be issued for a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Process,
    Pause,
    Backoff,
    Resume,
    Stop,
    Kill,
    Delay,
    Check,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Process => "process",
            Self::Pause => "pause",
            Self::Backoff => "backoff",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Delay => "delay",
            Self::Check => "check",
        }
    }

    /// Whether this action may be applied while the worker is in `status`
    pub fn is_allowed(&self, status: Status) -> bool {
        use Status::*;
        match self {
            Self::Start => matches!(status, InActive | Stopped | Paused | Failed),
            Self::Process => status == Running,
            Self::Pause | Self::Backoff => status == Running,
            Self::Resume => status == Paused,
            Self::Stop => matches!(status, InActive | Started | Running | Paused),
            Self::Kill => true,
            Self::Delay | Self::Check => status != Killed,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The requested edge is not in the state machine
    #[error("illegal transition from {from} to {to}")]
    IllegalMove { from: Status, to: Status },

    /// The action is not allowed in the current state
    #[error("cannot {action} while {status}")]
    IllegalAction { action: Action, status: Status },
}

/// Check an action against the current status
pub fn validate(action: Action, status: Status) -> Result<(), TransitionError> {
    if action.is_allowed(status) {
        Ok(())
    } else {
        Err(TransitionError::IllegalAction { action, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_rules() {
        for status in [Status::InActive, Status::Stopped, Status::Paused, Status::Failed] {
            assert!(Action::Start.is_allowed(status), "start from {status}");
            assert!(status.can_move_to(Status::Started));
        }
        for status in [Status::Running, Status::Completed, Status::Killed, Status::Started] {
            assert!(!Action::Start.is_allowed(status), "start from {status}");
        }
    }

    #[test]
    fn test_pause_and_resume_rules() {
        assert!(Action::Pause.is_allowed(Status::Running));
        assert!(Action::Backoff.is_allowed(Status::Running));
        assert!(!Action::Pause.is_allowed(Status::Paused));
        assert!(!Action::Pause.is_allowed(Status::InActive));

        assert!(Action::Resume.is_allowed(Status::Paused));
        assert!(!Action::Resume.is_allowed(Status::Running));
        assert!(!Action::Resume.is_allowed(Status::Stopped));
    }

    #[test]
    fn test_stop_only_from_non_terminal() {
        assert!(Action::Stop.is_allowed(Status::Running));
        assert!(Action::Stop.is_allowed(Status::Paused));
        assert!(!Action::Stop.is_allowed(Status::Completed));
        assert!(!Action::Stop.is_allowed(Status::Killed));
        assert!(!Action::Stop.is_allowed(Status::Failed));
    }

    #[test]
    fn test_kill_from_anywhere() {
        for status in Status::ALL {
            assert!(Action::Kill.is_allowed(status));
            assert!(status.can_move_to(Status::Killed));
        }
    }

    #[test]
    fn test_killed_is_final() {
        for status in Status::ALL {
            if status != Status::Killed {
                assert!(!Status::Killed.can_move_to(status));
            }
        }
    }

    #[test]
    fn test_completed_only_from_running() {
        for status in Status::ALL {
            assert_eq!(
                status.can_move_to(Status::Completed),
                status == Status::Running,
                "{status} -> Completed"
            );
        }
    }

    #[test]
    fn test_every_action_edge_exists() {
        // Each allowed action must map onto a legal move
        let target = |action: Action| match action {
            Action::Start => Some(Status::Started),
            Action::Pause | Action::Backoff => Some(Status::Paused),
            Action::Resume => Some(Status::Running),
            Action::Stop => Some(Status::Stopped),
            Action::Kill => Some(Status::Killed),
            Action::Process | Action::Delay | Action::Check => None,
        };
        let actions = [
            Action::Start,
            Action::Pause,
            Action::Backoff,
            Action::Resume,
            Action::Stop,
            Action::Kill,
        ];
        for action in actions {
            for status in Status::ALL {
                if action.is_allowed(status) {
                    let to = target(action).unwrap();
                    assert!(status.can_move_to(to), "{action} from {status}");
                }
            }
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate(Action::Resume, Status::Paused).is_ok());
        assert_eq!(
            validate(Action::Resume, Status::Running),
            Err(TransitionError::IllegalAction {
                action: Action::Resume,
                status: Status::Running
            })
        );
    }

    #[test]
    fn test_codes_are_distinct() {
        let mut codes: Vec<_> = Status::ALL.iter().map(|s| s.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), Status::ALL.len());
    }
}
