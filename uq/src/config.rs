//! Configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::TransportConfig;
use crate::registry::RegistryConfig;
use crate::scheduler::SchedulerConfig;

/// Main ussdq configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracing filter level (error, warn, info, debug, trace)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Scheduler loop settings
    pub scheduler: SchedulerConfig,

    /// Device and SIM provisioning defaults
    pub registry: RegistryConfig,

    /// Simulated device transport
    pub transport: TransportConfig,

    /// Where records are kept
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// An explicit path must load; the project-local and user files are
    /// skipped with a warning when unreadable.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local: .ussdq.yml
        let local_config = PathBuf::from(".ussdq.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User: ~/.config/ussdq/ussdq.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ussdq").join("ussdq.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Effective log level: flag, then config file, then INFO
    pub fn effective_log_level(&self, flag: Option<&str>) -> String {
        flag.map(str::to_string)
            .or_else(|| self.log_level.clone())
            .unwrap_or_else(|| "info".to_string())
    }
}

/// Record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: PathBuf,

    /// Keep records in memory only (lost on exit)
    #[serde(rename = "in-memory")]
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/ussdq on Linux)
        let database_path = dirs::data_dir()
            .map(|d| d.join("ussdq"))
            .unwrap_or_else(|| PathBuf::from(".ussdq"))
            .join("ussdq.db");

        Self {
            database_path,
            in_memory: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert!(config.scheduler.auto_execute);
        assert_eq!(config.registry.default_daily_quota, 20);
        assert_eq!(config.registry.sims_per_device, 2);
        assert!(!config.storage.in_memory);
        assert!(config.storage.database_path.ends_with("ussdq.db"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

scheduler:
  auto-execute: false
  tick-ms: 1000
  max-concurrent: 4
  execution-timeout-ms: 5000

registry:
  default-daily-quota: 50
  sims-per-device: 1

transport:
  latency-ms: 0
  failure-rate: 0.0

storage:
  database-path: /tmp/ussdq-test.db
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(!config.scheduler.auto_execute);
        assert_eq!(config.scheduler.tick_ms, 1000);
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.execution_timeout_ms, 5000);
        assert_eq!(config.registry.default_daily_quota, 50);
        assert_eq!(config.registry.sims_per_device, 1);
        assert_eq!(config.transport.latency_ms, 0);
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/ussdq-test.db"));
        assert!(!config.storage.in_memory);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
registry:
  default-daily-quota: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.registry.default_daily_quota, 5);
        assert_eq!(config.registry.sims_per_device, 2);
        assert_eq!(config.scheduler.tick_ms, 5000);
        assert_eq!(config.transport.latency_ms, 1500);
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage:\n  in-memory: true").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert!(config.storage.in_memory);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/ussdq.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_log_level_priority() {
        let mut config = Config::default();
        assert_eq!(config.effective_log_level(None), "info");

        config.log_level = Some("warn".to_string());
        assert_eq!(config.effective_log_level(None), "warn");
        assert_eq!(config.effective_log_level(Some("trace")), "trace");
    }
}
