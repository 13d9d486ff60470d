//! Error types for the flurry loader.

use snafu::prelude::*;

/// Errors that can occur during object storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Failed to build the S3 store for a bucket.
    #[snafu(display("S3 configuration error for bucket {bucket}: {source}"))]
    S3Config {
        bucket: String,
        source: object_store::Error,
    },

    /// Storage option key is not recognized by the S3 builder.
    #[snafu(display("Invalid storage option '{key}': {source}"))]
    InvalidOption {
        key: String,
        source: object_store::Error,
    },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed for s3://{bucket}/{key}: {source}"))]
    ObjectStore {
        bucket: String,
        key: String,
        source: object_store::Error,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source, .. } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

/// Errors that can occur while talking to the notification queue.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Failed to receive messages from the queue.
    #[snafu(display("Failed to receive messages from {queue_url}: {source}"))]
    Receive {
        queue_url: String,
        source: aws_sdk_sqs::error::SdkError<
            aws_sdk_sqs::operation::receive_message::ReceiveMessageError,
        >,
    },

    /// Notification body is not valid JSON.
    #[snafu(display("Notification body is not valid JSON: {source}"))]
    MalformedBody { source: serde_json::Error },
}

/// Errors that can occur while loading a file into ClickHouse.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// Buffer is not valid columnar data. Permanent for that file;
    /// never retried by the loader itself.
    #[snafu(display("Invalid input data: {message}"))]
    InvalidInput { message: String },

    /// DDL or DML statement failed (includes schema mismatches).
    #[snafu(display("ClickHouse error: {source}"))]
    Database { source: clickhouse::error::Error },
}

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Queue URL is empty.
    #[snafu(display("Queue URL cannot be empty"))]
    EmptyQueueUrl,

    /// ClickHouse URL is empty.
    #[snafu(display("ClickHouse URL cannot be empty"))]
    EmptyClickHouseUrl,

    /// A table name is empty.
    #[snafu(display("Table name '{which}' cannot be empty"))]
    EmptyTableName { which: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

/// Top-level loader errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoaderError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Queue error.
    #[snafu(display("Queue error: {source}"))]
    Queue { source: QueueError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// Load error.
    #[snafu(display("Load error: {source}"))]
    Load { source: LoadError },
}

impl From<ConfigError> for LoaderError {
    fn from(source: ConfigError) -> Self {
        LoaderError::Config { source }
    }
}

impl From<QueueError> for LoaderError {
    fn from(source: QueueError) -> Self {
        LoaderError::Queue { source }
    }
}

impl From<StorageError> for LoaderError {
    fn from(source: StorageError) -> Self {
        LoaderError::Storage { source }
    }
}

impl From<LoadError> for LoaderError {
    fn from(source: LoadError) -> Self {
        LoaderError::Load { source }
    }
}
