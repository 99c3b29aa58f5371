//! Scheduler tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for a [`Scheduler`](super::Scheduler).
///
/// Durations serialize as whole milliseconds.
///
/// # Example
///
/// ```rust
/// use sip_fsm::scheduler::SchedulerConfig;
/// use std::time::Duration;
///
/// let config: SchedulerConfig =
///     serde_json::from_str(r#"{ "idle_timeout": 20, "max_source_failures": 5 }"#).unwrap();
///
/// assert_eq!(config.idle_timeout, Duration::from_millis(20));
/// assert_eq!(config.max_idle_timeout, Duration::from_secs(1));
/// assert_eq!(config.max_source_failures, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// First wait when no deadline is pending. Doubles on every idle wake.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,
    /// Ceiling for the idle wait.
    #[serde(with = "millis")]
    pub max_idle_timeout: Duration,
    /// Consecutive callback failures after which an input source is dropped.
    pub max_source_failures: usize,
    /// Name given to the background thread.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_millis(50),
            max_idle_timeout: Duration::from_secs(1),
            max_source_failures: 3,
            thread_name: "sip-fsm-retry".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    pub fn max_source_failures(mut self, failures: usize) -> Self {
        self.max_source_failures = failures;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Next idle wait after `current`.
    pub(crate) fn next_idle(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max_idle_timeout)
            .max(self.idle_timeout.min(self.max_idle_timeout))
    }
}

pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_wait_doubles_up_to_ceiling() {
        let config = SchedulerConfig::default()
            .idle_timeout(Duration::from_millis(100))
            .max_idle_timeout(Duration::from_millis(300));

        let first = config.next_idle(config.idle_timeout);
        let second = config.next_idle(first);
        let third = config.next_idle(second);

        assert_eq!(first, Duration::from_millis(200));
        assert_eq!(second, Duration::from_millis(300));
        assert_eq!(third, Duration::from_millis(300));
    }

    #[test]
    fn durations_serialize_as_millis() {
        let config = SchedulerConfig::default().thread_name("transport");
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["idle_timeout"], 50);
        assert_eq!(json["max_idle_timeout"], 1000);
        assert_eq!(json["thread_name"], "transport");

        let back: SchedulerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
