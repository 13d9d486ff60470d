//! Staged ClickHouse loading.
//!
//! The target store has no transactional bulk-insert primitive, so each load
//! goes through a scoped staging table:
//!
//! 1. `CREATE TABLE {staging} AS {template}`
//! 2. synchronous row insert into the staging table
//! 3. `INSERT INTO {append_only} SELECT ..., now64(3) FROM {staging}`
//! 4. `DROP TABLE IF EXISTS {staging}` on every exit path
//!
//! The commit step stamps the whole batch with one server-evaluated
//! `created_at`, which is the version the ReplacingMergeTree table
//! deduplicates by.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{ClickHouseConfig, TableConfig};
use crate::error::{DatabaseSnafu, LoadError};

use super::kline::{decode_klines, KlineRow, COLUMNS};
use super::Loader;

/// Loader that stages each Parquet buffer through a temporary table before
/// committing it into the append-only table.
pub struct ClickHouseLoader {
    client: clickhouse::Client,
    append_only_table: String,
    staging_template: String,
}

impl ClickHouseLoader {
    /// Create a loader from configuration.
    pub fn new(config: &ClickHouseConfig, tables: &TableConfig) -> Self {
        let client = clickhouse::Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.username)
            .with_password(&config.password)
            // The commit SELECT must see every staged row; no async inserts
            .with_option("async_insert", "0");

        Self::with_client(client, &tables.append_only, &tables.staging_template)
    }

    /// Create a loader over an existing client.
    pub fn with_client(
        client: clickhouse::Client,
        append_only_table: &str,
        staging_template: &str,
    ) -> Self {
        Self {
            client,
            append_only_table: append_only_table.to_string(),
            staging_template: staging_template.to_string(),
        }
    }

    /// Staging table name for one load: template plus a microsecond UTC
    /// timestamp, so rapid sequential loads on this instance never collide.
    fn staging_table_name(&self) -> String {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S%6f");
        format!("{}_{}", self.staging_template, timestamp)
    }

    async fn load_via_staging(
        &self,
        staging: &str,
        rows: &[KlineRow],
    ) -> Result<(), LoadError> {
        self.client
            .query(&create_staging_sql(staging, &self.staging_template))
            .execute()
            .await
            .context(DatabaseSnafu)?;
        debug!(table = %staging, "Created staging table");

        let mut insert = self.client.insert::<KlineRow>(staging).context(DatabaseSnafu)?;
        for row in rows {
            insert.write(row).await.context(DatabaseSnafu)?;
        }
        insert.end().await.context(DatabaseSnafu)?;
        debug!(table = %staging, rows = rows.len(), "Populated staging table");

        self.client
            .query(&commit_sql(&self.append_only_table, staging))
            .execute()
            .await
            .context(DatabaseSnafu)?;
        info!(
            table = %self.append_only_table,
            rows = rows.len(),
            "Committed batch to append-only table"
        );

        Ok(())
    }

    /// Drop the staging table. A stranded staging table is a resource leak
    /// to monitor externally, not a reason to fail the load.
    async fn cleanup_staging(&self, staging: &str) {
        match self.client.query(&drop_staging_sql(staging)).execute().await {
            Ok(()) => debug!(table = %staging, "Dropped staging table"),
            Err(e) => warn!(table = %staging, error = %e, "Failed to drop staging table"),
        }
    }
}

#[async_trait]
impl Loader for ClickHouseLoader {
    async fn load(&self, buffer: Bytes) -> Result<(), LoadError> {
        // Decode before touching the store so a malformed buffer leaves no trace
        let rows = decode_klines(buffer)?;
        debug!(rows = rows.len(), "Deserialized parquet buffer");

        let staging = self.staging_table_name();
        let result = self.load_via_staging(&staging, &rows).await;
        self.cleanup_staging(&staging).await;
        result
    }
}

fn create_staging_sql(staging: &str, template: &str) -> String {
    format!("CREATE TABLE {staging} AS {template}")
}

fn commit_sql(append_only: &str, staging: &str) -> String {
    let columns = COLUMNS.join(", ");
    format!(
        "INSERT INTO {append_only} ({columns}, created_at) \
         SELECT {columns}, now64(3) AS created_at FROM {staging}"
    )
}

fn drop_staging_sql(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {staging}")
}
