//! tablewright.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Operator settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Image run by plan and apply worker pods.
    pub worker_image: String,
    pub image_pull_policy: String,
    /// Delay before re-checking a Table whose Database is not ready.
    pub requeue_after_secs: u64,
    /// Delay before retrying a reconciliation that failed with a retryable error.
    pub error_backoff_secs: u64,
    /// Attempts at writing a Table status before giving up on conflicts.
    pub status_retry_attempts: u32,
    /// Restrict watches to one namespace. Watches all namespaces when unset.
    pub namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            worker_image: "tablewright/worker:latest".to_string(),
            image_pull_policy: "IfNotPresent".to_string(),
            requeue_after_secs: 10,
            error_backoff_secs: 30,
            status_retry_attempts: 5,
            namespace: None,
        }
    }
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OperatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_image.trim().is_empty() {
            return Err(ConfigError::Invalid("worker_image must not be empty".into()));
        }
        if self.status_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "status_retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}
