//! Engine tuning loaded from YAML with environment overrides

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CONCURRENCY_ENV: &str = "KFORGE_CONCURRENCY";
pub const DRY_RUN_ENV: &str = "KFORGE_DRY_RUN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum tasks or deletions in flight at once
    pub concurrency: usize,

    /// Plan without calling render
    pub dry_run: bool,

    pub retry: RetryPolicy,

    pub deletion: DeletionPolicy,

    pub poll: PollPolicy,

    /// Wall-clock budget for a whole pass, in seconds
    pub deadline_secs: Option<u64>,

    /// `EnvFilter` directive, e.g. `kforge_cloud=debug`
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            dry_run: false,
            retry: RetryPolicy::default(),
            deletion: DeletionPolicy::default(),
            poll: PollPolicy::default(),
            deadline_secs: None,
            log_filter: None,
        }
    }
}

/// Backoff applied to transient cloud errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeletionPolicy {
    /// Attempts per resource before the deletion surfaces its error
    pub max_attempts: u32,
    /// Pause between rounds that saw a failure
    pub round_delay_ms: u64,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            round_delay_ms: 2_000,
        }
    }
}

impl DeletionPolicy {
    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }
}

/// Polling of long-running cloud operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_secs: 600,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EngineConfig {
    pub fn from_yaml(content: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// Reads the discovered config file, or defaults when there is none,
    /// then applies environment overrides
    pub fn load() -> Result<Self> {
        let config = match crate::find_config_file() {
            Ok(path) => Self::from_file(path)?,
            Err(ConfigError::ConfigFileNotFound) => Self::default(),
            Err(e) => return Err(e),
        };
        config.with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var(CONCURRENCY_ENV) {
            self.concurrency = value.parse().map_err(|_| ConfigError::InvalidEnvVar {
                name: CONCURRENCY_ENV.to_string(),
                value: value.clone(),
            })?;
        }
        if let Ok(value) = std::env::var(DRY_RUN_ENV) {
            self.dry_run = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnvVar {
                name: DRY_RUN_ENV.to_string(),
                value: value.clone(),
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.maxAttempts must be at least 1".into()));
        }
        if self.deletion.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "deletion.maxAttempts must be at least 1".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoffMultiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
