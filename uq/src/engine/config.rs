//! Transport configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the simulated USSD transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Simulated round-trip time of one dial
    #[serde(rename = "latency-ms", default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Probability (0.0 to 1.0) that a dial fails
    #[serde(rename = "failure-rate", default = "default_failure_rate")]
    pub failure_rate: f64,
}

fn default_latency_ms() -> u64 {
    1500
}

fn default_failure_rate() -> f64 {
    0.1
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            failure_rate: default_failure_rate(),
        }
    }
}

impl TransportConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Failure rate clamped into a valid probability
    pub fn failure_probability(&self) -> f64 {
        if self.failure_rate.is_nan() {
            return 0.0;
        }
        self.failure_rate.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.latency(), Duration::from_millis(1500));
        assert_eq!(config.failure_rate, 0.1);
    }

    #[test]
    fn test_failure_probability_is_clamped() {
        let mut config = TransportConfig::default();
        config.failure_rate = 3.0;
        assert_eq!(config.failure_probability(), 1.0);
        config.failure_rate = -1.0;
        assert_eq!(config.failure_probability(), 0.0);
        config.failure_rate = f64::NAN;
        assert_eq!(config.failure_probability(), 0.0);
    }

    #[test]
    fn test_deserialize_kebab_case() {
        let config: TransportConfig = serde_yaml::from_str("latency-ms: 10\nfailure-rate: 0.5").unwrap();
        assert_eq!(config.latency_ms, 10);
        assert_eq!(config.failure_rate, 0.5);
    }
}
