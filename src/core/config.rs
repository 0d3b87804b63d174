use super::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the per-key background task queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Maximum number of tasks executing at once for a single key.
    pub concurrency_per_key: usize,
    /// How often `flush` re-checks whether a key has drained.
    pub drain_poll_interval_ms: u64,
    /// Priority used when the caller does not pick one (lower runs sooner).
    pub default_priority: i32,
    /// Retries after the first attempt when the caller does not pick a value.
    pub default_max_retries: u32,
    /// Backoff before the first retry when the caller does not pick a value.
    pub default_initial_backoff_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            concurrency_per_key: 2,
            drain_poll_interval_ms: 25,
            default_priority: 10,
            default_max_retries: 3,
            default_initial_backoff_ms: 500,
        }
    }
}

impl TaskQueueConfig {
    /// Set the per-key concurrency ceiling
    pub fn concurrency_per_key(mut self, limit: usize) -> Self {
        self.concurrency_per_key = limit;
        self
    }

    /// Set the drain poll interval
    pub fn drain_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.drain_poll_interval_ms = interval_ms;
        self
    }

    /// Set the default retry budget
    pub fn default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Set the default initial backoff
    pub fn default_initial_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.default_initial_backoff_ms = backoff_ms;
        self
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.concurrency_per_key == 0 {
            return Err("concurrency_per_key must be at least 1".to_string());
        }
        if self.drain_poll_interval_ms == 0 {
            return Err("drain_poll_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Configuration for the debounced autosave scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Quiet period after the last edit before a save is issued.
    pub debounce_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self { debounce_ms: 3_000 }
    }
}

impl AutosaveConfig {
    /// Set the debounce window
    pub fn debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Top-level engine configuration.
///
/// Every section defaults independently, so a config file only needs to name
/// the values it overrides:
///
/// ```
/// use sheetsync::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "autosave": { "debounce_ms": 250 } }"#).unwrap();
/// assert_eq!(config.autosave.debounce_ms, 250);
/// assert_eq!(config.queue.concurrency_per_key, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: TaskQueueConfig,
    pub autosave: AutosaveConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue section
    pub fn queue(mut self, queue: TaskQueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Replace the autosave section
    pub fn autosave(mut self, autosave: AutosaveConfig) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate().map_err(SyncError::Config)
    }

    /// Parse a JSON document and validate the result.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| SyncError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("Failed to read '{}': {}", path.display(), err))
        })?;
        Self::from_json_str(&raw)
    }
}
