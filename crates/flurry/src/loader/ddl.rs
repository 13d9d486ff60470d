//! Table DDL and read-side helpers for the klines dataset.
//!
//! Three tables and a view back one dataset:
//! - a staging template the per-load tables are cloned from
//! - the append-only table, insert-only, one row per committed load row
//! - the ReplacingMergeTree table, versioned by `created_at`
//! - a materialized view routing append-only inserts into the merge table

use snafu::prelude::*;

use crate::config::TableConfig;
use crate::error::{DatabaseSnafu, LoadError};

use super::kline::{KlineRow, COLUMNS};

const COLUMN_DEFINITIONS: &str = "\
    symbol String,\n\
    open_time DateTime64(3),\n\
    open_price Float64,\n\
    high_price Float64,\n\
    low_price Float64,\n\
    close_price Float64,\n\
    volume Float64,\n\
    close_time DateTime64(3),\n\
    quote_asset_volume Float64,\n\
    number_of_trades Int64,\n\
    taker_buy_base_asset_volume Float64,\n\
    taker_buy_quote_asset_volume Float64,\n\
    ignore String,\n\
    created_at DateTime64(3) DEFAULT now64(3)";

/// DDL for the staging template, append-only table, merge table, and the
/// materialized view connecting them. Statements are idempotent.
pub fn create_table_statements(tables: &TableConfig) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{COLUMN_DEFINITIONS}\n) \
             ENGINE = MergeTree ORDER BY (symbol, open_time)",
            tables.staging_template
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{COLUMN_DEFINITIONS}\n) \
             ENGINE = MergeTree \
             PARTITION BY toYYYYMM(open_time) \
             ORDER BY (symbol, open_time)",
            tables.append_only
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{COLUMN_DEFINITIONS}\n) \
             ENGINE = ReplacingMergeTree(created_at) \
             PARTITION BY toYYYYMM(open_time) \
             ORDER BY (symbol, open_time)",
            tables.merge
        ),
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {merge}_mv TO {merge} \
             AS SELECT * FROM {append_only}",
            merge = tables.merge,
            append_only = tables.append_only,
        ),
    ]
}

/// Create the tables and view if they do not exist.
pub async fn ensure_tables(
    client: &clickhouse::Client,
    tables: &TableConfig,
) -> Result<(), LoadError> {
    for statement in create_table_statements(tables) {
        client
            .query(&statement)
            .execute()
            .await
            .context(DatabaseSnafu)?;
    }
    Ok(())
}

/// Read-side helper over the merge table.
pub struct KlinesQuery {
    client: clickhouse::Client,
    merge_table: String,
}

impl KlinesQuery {
    /// Create a query helper for the given merge table.
    pub fn new(client: clickhouse::Client, merge_table: &str) -> Self {
        Self {
            client,
            merge_table: merge_table.to_string(),
        }
    }

    /// Row count in the merge table. Approximate until parts merge;
    /// use [`fetch_latest`](Self::fetch_latest) for consistent reads.
    pub async fn count(&self) -> Result<u64, LoadError> {
        let sql = format!("SELECT count() FROM {}", self.merge_table);
        self.client
            .query(&sql)
            .fetch_one::<u64>()
            .await
            .context(DatabaseSnafu)
    }

    /// Latest intervals for a symbol, newest first.
    ///
    /// `FINAL` forces the merge pass, so the read sees exactly one row per
    /// (symbol, open_time) even before background compaction has run.
    pub async fn fetch_latest(
        &self,
        symbol: &str,
        limit: u64,
    ) -> Result<Vec<KlineRow>, LoadError> {
        let sql = format!(
            "SELECT {} FROM {} FINAL WHERE symbol = ? ORDER BY open_time DESC LIMIT ?",
            COLUMNS.join(", "),
            self.merge_table
        );
        self.client
            .query(&sql)
            .bind(symbol)
            .bind(limit)
            .fetch_all::<KlineRow>()
            .await
            .context(DatabaseSnafu)
    }

    /// Force background compaction of the merge table so subsequent plain
    /// reads see one row per key.
    pub async fn optimize_final(&self) -> Result<(), LoadError> {
        let sql = format!("OPTIMIZE TABLE {} FINAL", self.merge_table);
        self.client
            .query(&sql)
            .execute()
            .await
            .context(DatabaseSnafu)
    }
}
