//! Registry configuration

use serde::{Deserialize, Serialize};

/// Provisioning defaults for new devices and SIMs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Daily quota given to newly provisioned SIMs
    #[serde(rename = "default-daily-quota", default = "default_daily_quota")]
    pub default_daily_quota: u32,

    /// SIMs provisioned per registered device
    #[serde(rename = "sims-per-device", default = "default_sims_per_device")]
    pub sims_per_device: u32,
}

fn default_daily_quota() -> u32 {
    20
}

fn default_sims_per_device() -> u32 {
    2
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_daily_quota: default_daily_quota(),
            sims_per_device: default_sims_per_device(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.default_daily_quota, 20);
        assert_eq!(config.sims_per_device, 2);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: RegistryConfig = serde_yaml::from_str("default-daily-quota: 50").unwrap();
        assert_eq!(config.default_daily_quota, 50);
        assert_eq!(config.sims_per_device, 2);
    }
}
