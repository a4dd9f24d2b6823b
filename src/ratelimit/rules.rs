//! Named limiter configuration.
//!
//! Each protected operation gets its own limiter with an independent limit,
//! window and counter namespace. Limiters can be loaded from YAML either as a
//! single limiter or as a list under `limiters:`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use super::counter::WindowDuration;
use crate::error::{BulwarkError, Result};

/// Limits applied only while the shared counter store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub limit: u64,
    pub window: WindowDuration,
}

/// Configuration for one named limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Limiter name; also the counter namespace
    pub name: String,
    /// Requests admitted per window
    pub limit: u64,
    pub window: WindowDuration,
    /// Overrides for fallback mode; defaults to `limit` and `window`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackPolicy>,
}

impl LimiterConfig {
    pub fn new(name: impl Into<String>, limit: u64, window: WindowDuration) -> Self {
        Self {
            name: name.into(),
            limit,
            window,
            fallback: None,
        }
        .sanitized()
    }

    pub fn with_fallback(mut self, limit: u64, window: WindowDuration) -> Self {
        self.fallback = Some(FallbackPolicy {
            limit: limit.max(1),
            window,
        });
        self
    }

    /// The limit enforced against the shared store, never below one.
    pub fn effective_limit(&self) -> u64 {
        self.limit.max(1)
    }

    /// The limit and window enforced in fallback mode.
    pub fn fallback_policy(&self) -> FallbackPolicy {
        let policy = self.fallback.unwrap_or(FallbackPolicy {
            limit: self.limit,
            window: self.window,
        });
        FallbackPolicy {
            limit: policy.limit.max(1),
            ..policy
        }
    }

    /// Replace a zero limit, which would deny everything, with the strictest
    /// usable limit of one.
    pub fn sanitized(mut self) -> Self {
        if self.limit == 0 {
            warn!(limiter = %self.name, "Limiter configured with limit 0; using 1");
            self.limit = 1;
        }
        if let Some(fallback) = self.fallback.as_mut() {
            if fallback.limit == 0 {
                warn!(limiter = %self.name, "Fallback limit 0; using 1");
                fallback.limit = 1;
            }
        }
        self
    }

    /// Login attempts: 5 per 15 minutes.
    pub fn auth() -> Self {
        Self::new("auth", 5, WindowDuration::from_mins(15))
    }

    /// General API traffic: 100 per minute.
    pub fn api() -> Self {
        Self::new("api", 100, WindowDuration::from_mins(1))
    }

    /// Administrative actions: 10 per 15 minutes.
    pub fn admin() -> Self {
        Self::new("admin", 10, WindowDuration::from_mins(15))
    }

    /// Paid letter generation: 5 per hour.
    pub fn letter_generation() -> Self {
        Self::new("letter-gen", 5, WindowDuration::from_hours(1))
    }

    /// Subscription attempts: 3 per hour.
    pub fn subscription() -> Self {
        Self::new("subscription", 3, WindowDuration::from_hours(1))
    }

    /// All built-in limiters.
    pub fn presets() -> Vec<Self> {
        vec![
            Self::auth(),
            Self::api(),
            Self::admin(),
            Self::letter_generation(),
            Self::subscription(),
        ]
    }
}

#[derive(Debug, Deserialize)]
struct LimiterList {
    limiters: Vec<LimiterConfig>,
}

/// A set of limiters looked up by name.
#[derive(Debug, Clone, Default)]
pub struct LimiterRegistry {
    limiters: HashMap<String, LimiterConfig>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in presets.
    pub fn with_presets() -> Self {
        Self::from_configs(LimiterConfig::presets())
    }

    pub fn from_configs<I>(configs: I) -> Self
    where
        I: IntoIterator<Item = LimiterConfig>,
    {
        let mut registry = Self::new();
        for config in configs {
            registry.insert(config);
        }
        registry
    }

    /// Load limiters from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load limiters from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // A single limiter document
        if let Ok(config) = serde_yaml::from_str::<LimiterConfig>(yaml) {
            return Ok(Self::from_configs([config]));
        }

        // Otherwise a list under `limiters:`
        let list: LimiterList = serde_yaml::from_str(yaml).map_err(|e| {
            BulwarkError::Configuration(format!("Failed to parse limiter config: {}", e))
        })?;
        Ok(Self::from_configs(list.limiters))
    }

    /// Add or replace a limiter. Returns the previous config with that name.
    pub fn insert(&mut self, config: LimiterConfig) -> Option<LimiterConfig> {
        let config = config.sanitized();
        self.limiters.insert(config.name.clone(), config)
    }

    pub fn get(&self, name: &str) -> Option<&LimiterConfig> {
        self.limiters.get(name)
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Limiter names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.limiters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
