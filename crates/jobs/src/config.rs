//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::{Backoffs, DEFAULT_BACKOFF_SECONDS};
use crate::scheduler::TimerScheduler;

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("backoff schedule must not be empty")]
    EmptyBackoff,

    #[error("backoff schedule must be ascending: {0:?}")]
    UnorderedBackoff(Vec<u64>),

    #[error("scheduler needs at least one thread")]
    NoSchedulerThreads,
}

/// Configuration for a [`Coordinator`](crate::Coordinator)
///
/// # Example
///
/// ```
/// use workcrew_jobs::CoordinatorConfig;
/// use std::time::Duration;
///
/// let config = CoordinatorConfig::default()
///     .with_pause_duration(Duration::from_secs(10))
///     .with_backoff_seconds(vec![1, 5, 30])
///     .with_idle_backoff(false);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    /// Delay before a paused worker resumes, when the caller gives none
    #[serde(with = "duration_millis")]
    pub pause_duration: Duration,

    /// Ascending backoff schedule, in seconds
    pub backoff_seconds: Vec<u64>,

    /// Threads in the timer runtime
    pub scheduler_threads: usize,

    /// Back off instead of invoking a worker when its queue is empty
    pub idle_backoff: bool,

    /// How long shutdown waits for in-flight commands
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pause_duration: Duration::from_secs(30),
            backoff_seconds: DEFAULT_BACKOFF_SECONDS.to_vec(),
            scheduler_threads: TimerScheduler::DEFAULT_THREADS,
            idle_backoff: true,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKCREW_PAUSE_SECONDS`: default pause duration (default: 30)
    /// - `WORKCREW_BACKOFF_SECONDS`: comma separated schedule (default: 2,4,...,256)
    /// - `WORKCREW_SCHEDULER_THREADS`: timer threads (default: 2)
    /// - `WORKCREW_IDLE_BACKOFF`: back off on an empty queue (default: true)
    /// - `WORKCREW_SHUTDOWN_TIMEOUT_SECONDS`: graceful shutdown limit (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("WORKCREW_PAUSE_SECONDS") {
            config.pause_duration = Duration::from_secs(parse("WORKCREW_PAUSE_SECONDS", &v)?);
        }
        if let Some(v) = lookup("WORKCREW_BACKOFF_SECONDS") {
            config.backoff_seconds = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse("WORKCREW_BACKOFF_SECONDS", s))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = lookup("WORKCREW_SCHEDULER_THREADS") {
            config.scheduler_threads = parse("WORKCREW_SCHEDULER_THREADS", &v)?;
        }
        if let Some(v) = lookup("WORKCREW_IDLE_BACKOFF") {
            config.idle_backoff = match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "WORKCREW_IDLE_BACKOFF".to_string(),
                        value: v,
                        reason: "expected true or false".to_string(),
                    })
                }
            };
        }
        if let Some(v) = lookup("WORKCREW_SHUTDOWN_TIMEOUT_SECONDS") {
            config.shutdown_timeout =
                Duration::from_secs(parse("WORKCREW_SHUTDOWN_TIMEOUT_SECONDS", &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the default pause duration
    pub fn with_pause_duration(mut self, duration: Duration) -> Self {
        self.pause_duration = duration;
        self
    }

    /// Set the backoff schedule, in seconds
    pub fn with_backoff_seconds(mut self, schedule: Vec<u64>) -> Self {
        self.backoff_seconds = schedule;
        self
    }

    /// Set the number of timer threads
    pub fn with_scheduler_threads(mut self, threads: usize) -> Self {
        self.scheduler_threads = threads;
        self
    }

    /// Enable or disable backing off on an empty queue
    pub fn with_idle_backoff(mut self, enabled: bool) -> Self {
        self.idle_backoff = enabled;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the configuration for impossible values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_seconds.is_empty() {
            return Err(ConfigError::EmptyBackoff);
        }
        if self.backoff_seconds.windows(2).any(|w| w[0] > w[1]) {
            return Err(ConfigError::UnorderedBackoff(self.backoff_seconds.clone()));
        }
        if self.scheduler_threads == 0 {
            return Err(ConfigError::NoSchedulerThreads);
        }
        Ok(())
    }

    /// Fresh backoff cursor for one worker
    pub fn backoffs(&self) -> Backoffs {
        Backoffs::seconds(&self.backoff_seconds)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.pause_duration, Duration::from_secs(30));
        assert_eq!(config.backoff_seconds, vec![2, 4, 8, 16, 32, 64, 128, 256]);
        assert_eq!(config.scheduler_threads, 2);
        assert!(config.idle_backoff);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("WORKCREW_PAUSE_SECONDS", "5"),
            ("WORKCREW_BACKOFF_SECONDS", "1, 3, 9"),
            ("WORKCREW_SCHEDULER_THREADS", "4"),
            ("WORKCREW_IDLE_BACKOFF", "false"),
        ]))
        .unwrap();

        assert_eq!(config.pause_duration, Duration::from_secs(5));
        assert_eq!(config.backoff_seconds, vec![1, 3, 9]);
        assert_eq!(config.scheduler_threads, 4);
        assert!(!config.idle_backoff);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_number() {
        let err = CoordinatorConfig::from_lookup(lookup(&[("WORKCREW_PAUSE_SECONDS", "soon")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { key, .. } if key == "WORKCREW_PAUSE_SECONDS")
        );
    }

    #[test]
    fn test_rejects_bad_schedules() {
        let unordered = CoordinatorConfig::default().with_backoff_seconds(vec![4, 2]);
        assert_eq!(
            unordered.validate(),
            Err(ConfigError::UnorderedBackoff(vec![4, 2]))
        );

        let empty = CoordinatorConfig::default().with_backoff_seconds(vec![]);
        assert_eq!(empty.validate(), Err(ConfigError::EmptyBackoff));

        let no_threads = CoordinatorConfig::default().with_scheduler_threads(0);
        assert_eq!(no_threads.validate(), Err(ConfigError::NoSchedulerThreads));
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let config = CoordinatorConfig::default().with_pause_duration(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["pause_duration"], 1500);

        let back: CoordinatorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
