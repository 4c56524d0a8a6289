use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite database file; parent directories are created on open
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./data/playerpoints.db".to_string(),
        }
    }
}

/// Pay-command correlation window
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CorrelationConfig {
    pub ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl CorrelationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Batching pipeline tunables
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub drain_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_batch_size: 50,
            drain_interval_ms: 50,
        }
    }
}

impl PipelineConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

/// Which balance changes are recorded and how players are identified
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Master switch: when false, balance changes are ignored
    pub record_balance_changes: bool,
    /// Record deductions as player -> console
    pub log_negative: bool,
    /// Identify players by name instead of UUID
    pub use_player_name: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            record_balance_changes: true,
            log_negative: true,
            use_player_name: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    /// Store worker threads; defaults to half the available cores, min 2
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl RuntimeConfig {
    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(2)
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LookupConfig {
    pub page_size: u32,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self { page_size: 5 }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "point_ledger.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            storage: StorageConfig::default(),
            correlation: CorrelationConfig::default(),
            pipeline: PipelineConfig::default(),
            policy: PolicyConfig::default(),
            runtime: RuntimeConfig::default(),
            lookup: LookupConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.database_path is empty".to_string(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_capacity must be > 0".to_string(),
            ));
        }
        if self.pipeline.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_batch_size must be > 0".to_string(),
            ));
        }
        if self.pipeline.drain_interval_ms == 0 || self.correlation.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "drain and sweep intervals must be > 0".to_string(),
            ));
        }
        if self.lookup.page_size == 0 {
            return Err(ConfigError::Invalid(
                "lookup.page_size must be > 0".to_string(),
            ));
        }
        if self.runtime.worker_threads == Some(0) {
            return Err(ConfigError::Invalid(
                "runtime.worker_threads must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialize_minimal() {
        let yaml = r#"
log_level: "debug"
log_dir: "./logs"
log_file: "ledger.log"
use_json: false
rotation: "never"
"#;

        let config = AppConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.correlation.ttl_ms, 3_000);
        assert_eq!(config.pipeline.queue_capacity, 1000);
        assert_eq!(config.pipeline.max_batch_size, 50);
        assert_eq!(config.lookup.page_size, 5);
        assert!(config.policy.record_balance_changes);
    }

    #[test]
    fn test_config_deserialize_full() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "ledger.log"
use_json: true
rotation: "hourly"
storage:
  database_path: "/tmp/points.db"
correlation:
  ttl_ms: 1500
  sweep_interval_ms: 2000
pipeline:
  queue_capacity: 64
  max_batch_size: 8
  drain_interval_ms: 20
policy:
  record_balance_changes: true
  log_negative: false
  use_player_name: false
runtime:
  worker_threads: 3
lookup:
  page_size: 10
"#;

        let config = AppConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.storage.database_path, "/tmp/points.db");
        assert_eq!(config.correlation.ttl(), Duration::from_millis(1500));
        assert_eq!(config.pipeline.drain_interval(), Duration::from_millis(20));
        assert!(!config.policy.log_negative);
        assert!(!config.policy.use_player_name);
        assert_eq!(config.runtime.worker_threads(), 3);
        assert_eq!(config.lookup.page_size, 10);
    }

    #[test]
    fn test_config_rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.pipeline.max_batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_worker_threads_at_least_two() {
        assert!(RuntimeConfig::default().worker_threads() >= 2);
    }
}
