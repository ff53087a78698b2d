//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the loop dispatches on startup
    #[serde(rename = "auto-execute", default = "default_auto_execute")]
    pub auto_execute: bool,

    /// Interval between cycles in milliseconds
    #[serde(rename = "tick-ms", default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Max executions in flight per cycle (one per SIM)
    #[serde(rename = "max-concurrent", default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Upper bound on a single dial
    #[serde(rename = "execution-timeout-ms", default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
}

fn default_auto_execute() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    5000
}

fn default_max_concurrent() -> usize {
    10
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            auto_execute: default_auto_execute(),
            tick_ms: default_tick_ms(),
            max_concurrent: default_max_concurrent(),
            execution_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Concurrency bound, never zero
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.auto_execute);
        assert_eq!(config.tick(), Duration::from_secs(5));
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.execution_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_values_are_bounded() {
        let config = SchedulerConfig {
            tick_ms: 0,
            max_concurrent: 0,
            ..Default::default()
        };
        assert_eq!(config.tick(), Duration::from_millis(1));
        assert_eq!(config.concurrency(), 1);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SchedulerConfig = serde_yaml::from_str("auto-execute: false\ntick-ms: 250").unwrap();
        assert!(!config.auto_execute);
        assert_eq!(config.tick_ms, 250);
        assert_eq!(config.max_concurrent, 10);
    }
}
