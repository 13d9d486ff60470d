//! Flurry: notification-driven loader for market-data Parquet files.
//!
//! This crate handles:
//! - Polling an SQS queue for S3 object-creation notifications
//! - Downloading the referenced Parquet files
//! - Staging each file through a temporary ClickHouse table before
//!   committing into an append-only table
//! - Deduplicating retried loads via a ReplacingMergeTree table fed by a
//!   materialized view, keeping the latest `created_at` per key
//!
//! Delivery is at-least-once: a batch of messages is acknowledged only when
//! every referenced file loaded, so failures redeliver after the queue's
//! visibility timeout.

pub mod config;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod polling;
pub mod queue;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::Config;
pub use error::LoaderError;
pub use pipeline::LoaderProcess;
pub use self::signal::shutdown_signal;
pub use self::tracing::init_tracing;
