//! Per-instance machine configuration.

use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};

/// How a machine drives its timers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No background thread. The embedding application calls
    /// `check_timers` periodically.
    #[default]
    Sync,
    /// The machine owns a scheduler thread that checks timers when their
    /// deadlines pass and multiplexes input sources.
    Async,
}

/// Configuration for one machine instance.
///
/// # Example
///
/// ```rust
/// use sip_fsm::machine::{MachineConfig, Mode};
///
/// let config: MachineConfig = serde_json::from_str(r#"{ "mode": "async" }"#).unwrap();
/// assert_eq!(config.mode, Mode::Async);
/// assert_eq!(config.history_limit, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub mode: Mode,
    /// Committed transitions kept in the history. Zero disables history.
    pub history_limit: usize,
    /// Used only in [`Mode::Async`].
    pub scheduler: SchedulerConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Sync,
            history_limit: 64,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MachineConfig {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_are_synchronous() {
        let config = MachineConfig::default();
        assert_eq!(config.mode, Mode::Sync);
        assert_eq!(config.history_limit, 64);
    }

    #[test]
    fn nested_scheduler_config_deserializes() {
        let config: MachineConfig = serde_json::from_str(
            r#"{ "mode": "async", "scheduler": { "max_idle_timeout": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.mode, Mode::Async);
        assert_eq!(config.scheduler.max_idle_timeout, Duration::from_millis(250));
        assert_eq!(config.scheduler.idle_timeout, Duration::from_millis(50));
    }
}
