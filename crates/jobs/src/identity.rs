//! Stable naming for workers and jobs
//!
//! An [`Identity`] is built once and never mutated. Its [`Identity::id`]
//! string is the registry key used by the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of component an identity names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agent {
    /// Long-running application
    App,
    /// API endpoint host
    Api,
    /// Command line tool
    Cli,
    /// Job that owns one or more workers
    Job,
    /// Worker that executes tasks
    Worker,
    /// Test fixture
    Test,
}

impl Agent {
    /// Lower-case name used in identity strings and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Api => "api",
            Self::Cli => "cli",
            Self::Job => "job",
            Self::Worker => "worker",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a worker or job
///
/// ```text
/// name = signup.emails
/// full = signup.emails.worker.dev
/// id   = signup.emails.worker.dev.0190f3c2-...
/// ```
///
/// # Example
///
/// ```
/// use workcrew_jobs::Identity;
///
/// let id = Identity::worker("signup", "emails", "dev").with_instance("w1");
/// assert_eq!(id.id(), "signup.emails.worker.dev.w1");
/// assert_eq!(id.name(), "signup.emails");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    area: String,
    service: String,
    agent: Agent,
    env: String,
    instance: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl Identity {
    /// Create a new identity with a generated instance id
    pub fn new(
        area: impl Into<String>,
        service: impl Into<String>,
        agent: Agent,
        env: impl Into<String>,
    ) -> Self {
        Self {
            area: area.into(),
            service: service.into(),
            agent,
            env: env.into(),
            instance: Uuid::now_v7().to_string(),
            tags: vec![],
        }
    }

    /// Identity for a worker
    pub fn worker(
        area: impl Into<String>,
        service: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self::new(area, service, Agent::Worker, env)
    }

    /// Identity for a job
    pub fn job(
        area: impl Into<String>,
        service: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self::new(area, service, Agent::Job, env)
    }

    /// Identity for tests
    pub fn test(name: impl Into<String>) -> Self {
        Self::new("tests", name, Agent::Test, "dev")
    }

    /// Replace the instance id
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Add a free-form tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Same naming with a freshly generated instance id
    pub fn new_instance(&self) -> Self {
        self.clone().with_instance(Uuid::now_v7().to_string())
    }

    pub fn area(&self) -> &str {
        &self.area
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn agent(&self) -> Agent {
        self.agent
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Short name: `area.service`
    pub fn name(&self) -> String {
        format!("{}.{}", self.area, self.service)
    }

    /// Name with agent and environment: `area.service.agent.env`
    pub fn full_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.name(),
            self.agent,
            self.env.to_lowercase()
        )
    }

    /// Unique key: `area.service.agent.env.instance`
    pub fn id(&self) -> String {
        format!("{}.{}", self.full_name(), self.instance)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        let id = Identity::job("signup", "alerts", "QAT").with_instance("abc");
        assert_eq!(id.name(), "signup.alerts");
        assert_eq!(id.full_name(), "signup.alerts.job.qat");
        assert_eq!(id.id(), "signup.alerts.job.qat.abc");
        assert_eq!(id.to_string(), id.id());
    }

    #[test]
    fn test_generated_instances_are_unique() {
        let a = Identity::worker("area", "svc", "dev");
        let b = a.new_instance();
        assert_eq!(a.name(), b.name());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_tags() {
        let id = Identity::test("tags").with_tag("queue").with_tag("batch");
        assert_eq!(id.tags(), &["queue".to_string(), "batch".to_string()]);
        assert_eq!(id.agent(), Agent::Test);
    }

    #[test]
    fn test_serialization() {
        let id = Identity::worker("a", "b", "dev").with_tag("t");
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("\"agent\":\"worker\""));
        let parsed: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
