//! Queue Configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables: `LISTQ_MAX_PENDING`, `LISTQ_OVERFLOW_POLICY`,
//!    `LISTQ_MERGE_KEYS` (comma separated), `LISTQ_SCHEDULER`,
//!    `LISTQ_SKIP_UNCHANGED`
//! 2. Config file (TOML)
//! 3. Defaults: unbounded, `DROP_NEW`, no merge keys, inline scheduler
//!
//! # Example Config File
//!
//! ```toml
//! max_pending = 16
//! overflow_policy = "DROP_OLDEST"
//! merge_keys = ["ReplaceAll"]
//! scheduler = "worker"   # inline, worker
//! worker_name = "listq-main"
//! skip_unchanged_commits = true
//! ```

use crate::policy::{OverflowPolicy, QueuePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use void_listops::names;

/// Errors loading a queue configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{key}': {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Where the execution loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// On whichever thread enqueues or completes
    Inline,
    /// On one dedicated worker thread
    Worker,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        Self::Inline
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

impl std::str::FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inline" | "caller" => Ok(Self::Inline),
            "worker" | "main" | "thread" => Ok(Self::Worker),
            _ => Err(format!("Unknown scheduler: {}", s)),
        }
    }
}

/// Complete queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending capacity; 0 means unbounded
    pub max_pending: usize,
    /// What to do when the queue is full
    pub overflow_policy: OverflowPolicy,
    /// Operation names that coalesce at the queue tail
    pub merge_keys: Vec<String>,
    /// Where the execution loop runs
    pub scheduler: SchedulerKind,
    /// Thread name for the worker scheduler
    pub worker_name: String,
    /// Signal completion without committing when an operation changes nothing
    pub skip_unchanged_commits: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: QueuePolicy::UNBOUNDED,
            overflow_policy: OverflowPolicy::DropNew,
            merge_keys: Vec::new(),
            scheduler: SchedulerKind::Inline,
            worker_name: "listq-worker".to_string(),
            skip_unchanged_commits: false,
        }
    }
}

impl QueueConfig {
    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => {
                let config = Self::load_from_file(path)?;
                log::info!("Loaded queue config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.resolve()
    }

    /// Apply environment overrides and validate the result
    pub fn resolve(self) -> ConfigResult<Self> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` and validate the result
    pub fn resolve_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        self.apply_overrides(lookup);
        self.validate()?;
        Ok(self)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `LISTQ_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override fields from any key lookup; unparseable values are ignored
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("LISTQ_MAX_PENDING") {
            match value.trim().parse() {
                Ok(max_pending) => {
                    self.max_pending = max_pending;
                    log::info!("Max pending from env: {}", self.max_pending);
                }
                Err(_) => log::warn!("Ignoring LISTQ_MAX_PENDING={}", value),
            }
        }

        if let Some(value) = lookup("LISTQ_OVERFLOW_POLICY") {
            match value.parse() {
                Ok(policy) => {
                    self.overflow_policy = policy;
                    log::info!("Overflow policy from env: {}", self.overflow_policy);
                }
                Err(e) => log::warn!("Ignoring LISTQ_OVERFLOW_POLICY: {}", e),
            }
        }

        if let Some(value) = lookup("LISTQ_MERGE_KEYS") {
            self.merge_keys = value
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
            log::info!("Merge keys from env: {:?}", self.merge_keys);
        }

        if let Some(value) = lookup("LISTQ_SCHEDULER") {
            match value.parse() {
                Ok(scheduler) => self.scheduler = scheduler,
                Err(e) => log::warn!("Ignoring LISTQ_SCHEDULER: {}", e),
            }
        }

        if let Some(value) = lookup("LISTQ_SKIP_UNCHANGED") {
            self.skip_unchanged_commits = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }

    /// Check merge keys name real operations and the worker has a name
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(key) = self.merge_keys.iter().find(|key| !names::ALL.contains(&key.as_str())) {
            return Err(ConfigError::InvalidValue {
                key: "merge_keys".to_string(),
                value: key.clone(),
                reason: format!("expected one of {}", names::ALL.join(", ")),
            });
        }
        if self.scheduler == SchedulerKind::Worker && self.worker_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "worker_name".to_string(),
                value: self.worker_name.clone(),
                reason: "worker thread needs a name".to_string(),
            });
        }
        Ok(())
    }

    /// Capacity settings as a policy
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy::new(self.max_pending, self.overflow_policy)
    }
}
