//! Structured events describing worker state
//!
//! ```text
//! Event {
//!     uuid    = "0190f3c2-...",
//!     area    = "signup",
//!     service = "emails",
//!     agent   = "worker",
//!     env     = "pro",
//!     inst    = "worker-001",
//!     name    = "WRK_PAUSED",
//!     desc    = "State changed",
//!     status  = Paused (200106),
//!     source  = "wrk",
//!     target  = "queue://emails",
//!     time    = 2024-05-01T10:00:00Z,
//!     fields  = [("reason", "rate limited")]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;
use crate::status::{Action, Status};

/// Target used when a worker has no queue
pub const NO_QUEUE: &str = "no-queue";

/// One structured, loggable record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uuid: String,
    pub area: String,
    pub service: String,
    pub agent: String,
    pub env: String,
    pub instance: String,
    pub name: String,
    pub desc: String,
    pub status: Status,
    pub code: i32,
    pub source: String,
    pub target: String,
    pub value: String,
    pub tag: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub fields: Vec<(String, String)>,
}

impl Event {
    /// Look up a field by key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Builders for [`Event`]s. Pure: nothing here touches worker state.
pub struct Events;

impl Events {
    /// Build an event from an identity, its status and free-form fields
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        id: &Identity,
        status: Status,
        name: &str,
        desc: &str,
        source: &str,
        target: &str,
        value: &str,
        fields: Vec<(String, String)>,
    ) -> Event {
        Event {
            uuid: Uuid::now_v7().to_string(),
            area: id.area().to_string(),
            service: id.name(),
            agent: id.agent().to_string(),
            env: id.env().to_string(),
            instance: id.instance().to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            status,
            code: status.code(),
            source: source.to_string(),
            target: target.to_string(),
            value: value.to_string(),
            tag: id.tags().first().cloned().unwrap_or_default(),
            time: Utc::now(),
            fields,
        }
    }

    /// Event for a worker status change
    pub fn transition(
        id: &Identity,
        from: Status,
        to: Status,
        note: &str,
        target: &str,
        mut fields: Vec<(String, String)>,
    ) -> Event {
        fields.insert(0, ("from".to_string(), from.to_string()));
        fields.insert(1, ("note".to_string(), note.to_string()));
        let name = Self::transition_name(to);
        Self::build(id, to, &name, "State changed", "wrk", target, "", fields)
    }

    /// Name carried by transition events into `status`, e.g. `WRK_PAUSED`
    pub fn transition_name(status: Status) -> String {
        format!("WRK_{}", status.as_str().to_uppercase())
    }

    /// Event for a control command issued to a worker
    pub fn command(id: &Identity, status: Status, action: Action, target: &str) -> Event {
        let name = format!("WRK_{}", action.as_str().to_uppercase());
        let desc = format!("WRK command - {action}");
        Self::build(id, status, &name, &desc, "cmd", target, "", vec![])
    }

    /// Free-form marker for a worker (e.g. backoff start / finish)
    pub fn marker(
        id: &Identity,
        status: Status,
        name: &str,
        target: &str,
        fields: Vec<(String, String)>,
    ) -> Event {
        Self::build(id, status, name, "Marker", "wrk", target, "", fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_copies_identity() {
        let id = Identity::worker("signup", "emails", "pro")
            .with_instance("w-1")
            .with_tag("batch");
        let event = Events::build(
            &id,
            Status::Running,
            "WRK_RUNNING",
            "State changed",
            "wrk",
            "queue://emails",
            "",
            vec![("region".into(), "usa".into())],
        );

        assert_eq!(event.area, "signup");
        assert_eq!(event.service, "signup.emails");
        assert_eq!(event.agent, "worker");
        assert_eq!(event.env, "pro");
        assert_eq!(event.instance, "w-1");
        assert_eq!(event.tag, "batch");
        assert_eq!(event.code, Status::Running.code());
        assert_eq!(event.field("region"), Some("usa"));
        assert!(!event.uuid.is_empty());
    }

    #[test]
    fn test_transition_event() {
        let id = Identity::test("t");
        let event = Events::transition(
            &id,
            Status::Running,
            Status::Paused,
            "busy",
            NO_QUEUE,
            vec![],
        );
        assert_eq!(event.name, "WRK_PAUSED");
        assert_eq!(event.name, Events::transition_name(Status::Paused));
        assert_eq!(event.status, Status::Paused);
        assert_eq!(event.field("from"), Some("Running"));
        assert_eq!(event.field("note"), Some("busy"));
        assert_eq!(event.target, NO_QUEUE);
    }

    #[test]
    fn test_command_event() {
        let id = Identity::test("t");
        let event = Events::command(&id, Status::Running, Action::Pause, NO_QUEUE);
        assert_eq!(event.name, "WRK_PAUSE");
        assert_eq!(event.source, "cmd");
    }

    #[test]
    fn test_events_are_unique() {
        let id = Identity::test("t");
        let a = Events::marker(&id, Status::Paused, "backoff_start", NO_QUEUE, vec![]);
        let b = Events::marker(&id, Status::Paused, "backoff_start", NO_QUEUE, vec![]);
        assert_ne!(a.uuid, b.uuid);
    }
}
