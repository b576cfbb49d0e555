//! Commands funneled through a worker's channel

use std::time::Duration;

use tokio::sync::oneshot;

use super::CoordinatorError;
use crate::status::{Action, Status};
use crate::work::Task;

/// Who issued a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// A public coordinator call
    Caller,
    /// Follow-up after `More` / `Next`, or the first round after start/resume
    Continuation,
    /// Timer armed by `pause`
    PauseTimer,
    /// Timer armed by `backoff`
    BackoffTimer,
    /// Timer armed by `delay`
    DelayTimer,
}

impl Source {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Continuation => "continuation",
            Self::PauseTimer => "pause-timer",
            Self::BackoffTimer => "backoff-timer",
            Self::DelayTimer => "delay-timer",
        }
    }
}

/// State a scheduled command expects to find when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Guard {
    /// Required status, if any
    pub expected: Option<Status>,
    /// Halt generation at the time the timer was armed
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) enum Command {
    Start {
        task: Task,
        require_task: bool,
        source: Source,
        guard: Option<Guard>,
    },
    Process {
        task: Task,
        source: Source,
        /// Task was pulled from the coordinator's queue and must be acknowledged
        pulled: bool,
    },
    Resume {
        reason: String,
        task: Task,
        source: Source,
        guard: Option<Guard>,
    },
    Pause {
        reason: String,
        delay: Option<Duration>,
    },
    Backoff {
        reason: String,
    },
    Stop {
        reason: String,
    },
    Kill {
        reason: String,
    },
    Delay {
        delay: Duration,
    },
    Check,
}

impl Command {
    pub(crate) fn action(&self) -> Action {
        match self {
            Self::Start { .. } => Action::Start,
            Self::Process { .. } => Action::Process,
            Self::Resume { .. } => Action::Resume,
            Self::Pause { .. } => Action::Pause,
            Self::Backoff { .. } => Action::Backoff,
            Self::Stop { .. } => Action::Stop,
            Self::Kill { .. } => Action::Kill,
            Self::Delay { .. } => Action::Delay,
            Self::Check => Action::Check,
        }
    }

    pub(crate) fn source(&self) -> Source {
        match self {
            Self::Start { source, .. }
            | Self::Process { source, .. }
            | Self::Resume { source, .. } => *source,
            _ => Source::Caller,
        }
    }

    /// Round of work issued by the coordinator itself
    pub(crate) fn continuation(task: Task, pulled: bool) -> Self {
        Self::Process {
            task,
            source: Source::Continuation,
            pulled,
        }
    }
}

pub(crate) type Reply = oneshot::Sender<Result<Status, CoordinatorError>>;

/// A command plus the caller waiting on it, if any
#[derive(Debug)]
pub(crate) struct Envelope {
    pub command: Command,
    pub reply: Option<Reply>,
}

impl Envelope {
    /// Fire-and-forget command (timers, continuations)
    pub(crate) fn detached(command: Command) -> Self {
        Self {
            command,
            reply: None,
        }
    }

    pub(crate) fn with_reply(
        command: Command,
    ) -> (Self, oneshot::Receiver<Result<Status, CoordinatorError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                reply: Some(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions() {
        let cmd = Command::Pause {
            reason: "x".into(),
            delay: None,
        };
        assert_eq!(cmd.action(), Action::Pause);
        assert_eq!(cmd.source(), Source::Caller);

        let cmd = Command::continuation(Task::Empty, false);
        assert_eq!(cmd.action(), Action::Process);
        assert_eq!(cmd.source(), Source::Continuation);
    }

    #[tokio::test]
    async fn test_reply_roundtrip() {
        let (envelope, rx) = Envelope::with_reply(Command::Check);
        envelope.reply.unwrap().send(Ok(Status::Running)).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), Status::Running);
    }
}
