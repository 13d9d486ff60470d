//! Configuration for the flurry loader.

mod vars;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

pub use vars::{interpolate, InterpolationResult};

/// Configuration for the notification queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// URL of the SQS queue receiving S3 object-creation notifications.
    pub url: String,
    /// Maximum messages fetched per polling cycle (transport caps this at 10).
    #[serde(default = "default_batch_size")]
    pub max_messages_per_batch: usize,
    /// Seconds to sleep between polling cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    5
}

/// Configuration for the ClickHouse connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    /// ClickHouse HTTP endpoint (e.g. "http://localhost:8123").
    pub url: String,
    /// Database name.
    #[serde(default = "default_database")]
    pub database: String,
    /// Username.
    #[serde(default = "default_username")]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

fn default_database() -> String {
    "default".to_string()
}

fn default_username() -> String {
    "default".to_string()
}

/// Names of the three tables behind one loaded dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Append-only table receiving every committed load.
    #[serde(default = "default_append_only")]
    pub append_only: String,
    /// ReplacingMergeTree table holding the deduplicated view.
    #[serde(default = "default_merge")]
    pub merge: String,
    /// Base name for staging tables (a timestamp suffix is appended per load).
    #[serde(default = "default_staging_template")]
    pub staging_template: String,
}

fn default_append_only() -> String {
    "klines_append_only".to_string()
}

fn default_merge() -> String {
    "klines_rmt".to_string()
}

fn default_staging_template() -> String {
    "klines_temp".to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            append_only: default_append_only(),
            merge: default_merge(),
            staging_template: default_staging_template(),
        }
    }
}

/// Configuration for source object storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Extra S3 options (region, endpoint, credentials) merged over the
    /// environment-derived defaults.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// Main configuration for flurry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Queue configuration.
    pub queue: QueueConfig,
    /// ClickHouse configuration.
    pub clickhouse: ClickHouseConfig,
    /// Table names.
    #[serde(default)]
    pub tables: TableConfig,
    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { source })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let result = interpolate(contents);
        if !result.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: result.errors.join("\n"),
            });
        }

        let config: Config = serde_yaml::from_str(&result.text)
            .map_err(|source| ConfigError::YamlParse { source })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.url.is_empty() {
            return Err(ConfigError::EmptyQueueUrl);
        }
        if self.clickhouse.url.is_empty() {
            return Err(ConfigError::EmptyClickHouseUrl);
        }
        for (which, name) in [
            ("append_only", &self.tables.append_only),
            ("merge", &self.tables.merge),
            ("staging_template", &self.tables.staging_template),
        ] {
            if name.is_empty() {
                return Err(ConfigError::EmptyTableName {
                    which: which.to_string(),
                });
            }
        }
        Ok(())
    }
}
