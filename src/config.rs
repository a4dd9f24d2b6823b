//! Configuration management for Bulwark.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BulwarkError, Result};
use crate::ratelimit::{LimiterConfig, LimiterRegistry};

/// Prefix for environment overrides, e.g. `BULWARK__QUEUE__BATCH_SIZE=10`.
pub const ENV_PREFIX: &str = "BULWARK";

/// Main configuration for the Bulwark service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulwarkConfig {
    /// Delivery queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Admission limiter configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Delivery queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Items drained per processing pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between processing passes
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Attempt ceiling for messages queued without an explicit one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    /// Upper bound on retry delay, in seconds
    #[serde(default)]
    pub max_backoff_secs: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_secs: default_poll_interval(),
            default_max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: None,
        }
    }
}

fn default_batch_size() -> usize {
    20
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    300
}

/// Admission limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Named limiters
    #[serde(default = "LimiterConfig::presets")]
    pub limiters: Vec<LimiterConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limiters: LimiterConfig::presets(),
        }
    }
}

impl RateLimitingConfig {
    pub fn registry(&self) -> LimiterRegistry {
        LimiterRegistry::from_configs(self.limiters.iter().cloned())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BulwarkConfig {
    /// Load configuration from an optional file plus `BULWARK__` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| BulwarkError::Configuration(e.to_string()))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| BulwarkError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::WindowDuration;

    #[test]
    fn test_defaults() {
        let config = BulwarkConfig::default();
        assert_eq!(config.queue.batch_size, 20);
        assert_eq!(config.queue.default_max_retries, 3);
        assert_eq!(config.queue.base_backoff_secs, 300);
        assert_eq!(config.rate_limiting.limiters.len(), 5);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
queue:
  batch_size: 10
logging:
  format: json
"#;
        let config = BulwarkConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.poll_interval_secs, 60);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.rate_limiting.registry().len(), 5);
    }

    #[test]
    fn test_custom_limiters_replace_presets() {
        let yaml = r#"
rate_limiting:
  limiters:
    - name: auth
      limit: 3
      window: "10 m"
"#;
        let config = BulwarkConfig::from_yaml(yaml).unwrap();
        let registry = config.rate_limiting.registry();
        assert_eq!(registry.len(), 1);
        let auth = registry.get("auth").unwrap();
        assert_eq!(auth.limit, 3);
        assert_eq!(auth.window, WindowDuration::from_mins(10));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bulwark-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "queue:\n  poll_interval_secs: 5\n").unwrap();

        let config = BulwarkConfig::load(Some(&path)).unwrap();
        assert_eq!(config.queue.poll_interval_secs, 5);
        assert_eq!(config.queue.batch_size, 20);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_env_overrides_defaults() {
        // Only this test reads `base_backoff_secs` through `load`.
        let var = "BULWARK__QUEUE__BASE_BACKOFF_SECS";
        std::env::set_var(var, "7");
        let loaded = BulwarkConfig::load(None);
        std::env::remove_var(var);

        let config = loaded.unwrap();
        assert_eq!(config.queue.base_backoff_secs, 7);
        assert_eq!(config.queue.default_max_retries, 3);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = BulwarkConfig::load(Some(Path::new("/nonexistent/bulwark.yaml"))).unwrap_err();
        assert!(matches!(err, BulwarkError::Configuration(_)));
    }
}
