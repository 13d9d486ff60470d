//! Columnar staging loader for ClickHouse.
//!
//! A load runs through a three-stage table pipeline: rows land in a
//! per-load staging table, are copied into the append-only table with a
//! server-generated `created_at`, and a materialized view routes them into a
//! ReplacingMergeTree table that keeps the latest version per
//! (symbol, open_time).

mod ddl;
mod kline;
mod staging;

pub use ddl::{create_table_statements, ensure_tables, KlinesQuery};
pub use kline::{decode_klines, KlineRow, COLUMNS};
pub use staging::ClickHouseLoader;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LoadError;

/// Loads one columnar byte buffer into the analytical store.
///
/// Implemented by [`ClickHouseLoader`] in production and by in-memory fakes
/// in tests.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Load the buffer. A buffer that is not valid columnar data fails with
    /// [`LoadError::InvalidInput`]; store failures with
    /// [`LoadError::Database`].
    async fn load(&self, buffer: Bytes) -> Result<(), LoadError>;
}
