//! Kline row type and Parquet decoding.
//!
//! The producer writes one Parquet file per extraction batch. Columns are
//! located by name, never by position, and the numeric columns tolerate both
//! encodings seen in deployments: decimal-as-string (the exchange's native
//! representation) and Float64.

use arrow::array::{
    Array, Float64Array, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray,
};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use clickhouse::Row;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{InvalidInputSnafu, LoadError};

/// Column names shared by the staging, append-only, and merge tables,
/// excluding the server-generated `created_at`.
pub const COLUMNS: [&str; 13] = [
    "symbol",
    "open_time",
    "open_price",
    "high_price",
    "low_price",
    "close_price",
    "volume",
    "close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_asset_volume",
    "taker_buy_quote_asset_volume",
    "ignore",
];

/// One candlestick interval, matching the ClickHouse table schema.
///
/// `created_at` is deliberately absent: the commit step generates it
/// server-side so the whole batch shares one version timestamp.
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct KlineRow {
    pub symbol: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub open_time: DateTime<Utc>,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: f64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub close_time: DateTime<Utc>,
    pub quote_asset_volume: f64,
    pub number_of_trades: i64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
    pub ignore: String,
}

fn invalid_input(message: impl Into<String>) -> LoadError {
    InvalidInputSnafu {
        message: message.into(),
    }
    .build()
}

/// Decode a self-describing Parquet buffer into kline rows.
///
/// Every failure here is [`LoadError::InvalidInput`]: a buffer that cannot
/// be decoded is permanent for that file and will not succeed on redelivery.
pub fn decode_klines(data: Bytes) -> Result<Vec<KlineRow>, LoadError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| invalid_input(format!("not a parquet buffer: {e}")))?
        .build()
        .map_err(|e| invalid_input(format!("failed to open parquet reader: {e}")))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| invalid_input(format!("failed to read batch: {e}")))?;
        decode_batch(&batch, &mut rows)?;
    }
    Ok(rows)
}

fn decode_batch(batch: &RecordBatch, rows: &mut Vec<KlineRow>) -> Result<(), LoadError> {
    let symbol = string_column(batch, "symbol")?;
    let open_time = time_column(batch, "open_time")?;
    let open_price = numeric_column(batch, "open_price")?;
    let high_price = numeric_column(batch, "high_price")?;
    let low_price = numeric_column(batch, "low_price")?;
    let close_price = numeric_column(batch, "close_price")?;
    let volume = numeric_column(batch, "volume")?;
    let close_time = time_column(batch, "close_time")?;
    let quote_asset_volume = numeric_column(batch, "quote_asset_volume")?;
    let number_of_trades = int_column(batch, "number_of_trades")?;
    let taker_buy_base = numeric_column(batch, "taker_buy_base_asset_volume")?;
    let taker_buy_quote = numeric_column(batch, "taker_buy_quote_asset_volume")?;
    let ignore = string_column(batch, "ignore")?;

    rows.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(KlineRow {
            symbol: symbol.value(i).to_string(),
            open_time: open_time.value(i)?,
            open_price: open_price.value(i)?,
            high_price: high_price.value(i)?,
            low_price: low_price.value(i)?,
            close_price: close_price.value(i)?,
            volume: volume.value(i)?,
            close_time: close_time.value(i)?,
            quote_asset_volume: quote_asset_volume.value(i)?,
            number_of_trades: number_of_trades.value(i),
            taker_buy_base_asset_volume: taker_buy_base.value(i)?,
            taker_buy_quote_asset_volume: taker_buy_quote.value(i)?,
            ignore: ignore.value(i).to_string(),
        });
    }
    Ok(())
}

fn column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a dyn Array, LoadError> {
    batch
        .column_by_name(name)
        .map(|array| array.as_ref())
        .ok_or_else(|| invalid_input(format!("missing column '{name}'")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, LoadError> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| invalid_input(format!("column '{name}' is not a string column")))
}

/// A numeric column in either of its deployed encodings.
enum NumericColumn<'a> {
    Utf8 { array: &'a StringArray, name: &'a str },
    Float64(&'a Float64Array),
}

impl NumericColumn<'_> {
    fn value(&self, row: usize) -> Result<f64, LoadError> {
        match self {
            NumericColumn::Utf8 { array, name } => {
                let raw = array.value(row);
                raw.parse().map_err(|_| {
                    invalid_input(format!("column '{name}' row {row}: not a decimal: '{raw}'"))
                })
            }
            NumericColumn::Float64(array) => Ok(array.value(row)),
        }
    }
}

fn numeric_column<'a>(
    batch: &'a RecordBatch,
    name: &'a str,
) -> Result<NumericColumn<'a>, LoadError> {
    let array = column(batch, name)?;
    if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
        return Ok(NumericColumn::Utf8 {
            array: strings,
            name,
        });
    }
    if let Some(floats) = array.as_any().downcast_ref::<Float64Array>() {
        return Ok(NumericColumn::Float64(floats));
    }
    Err(invalid_input(format!(
        "column '{name}' is neither string nor float64"
    )))
}

/// A time column in any of its deployed encodings: timestamp (ms or us
/// resolution) or raw epoch milliseconds as Int64.
enum TimeColumn<'a> {
    Millis(&'a TimestampMillisecondArray),
    Micros(&'a TimestampMicrosecondArray),
    EpochMillis(&'a Int64Array),
}

impl TimeColumn<'_> {
    fn value(&self, row: usize) -> Result<DateTime<Utc>, LoadError> {
        let millis = match self {
            TimeColumn::Millis(array) => array.value(row),
            TimeColumn::Micros(array) => array.value(row) / 1000,
            TimeColumn::EpochMillis(array) => array.value(row),
        };
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| invalid_input(format!("row {row}: timestamp out of range: {millis}")))
    }
}

fn time_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<TimeColumn<'a>, LoadError> {
    let array = column(batch, name)?;
    if let Some(millis) = array.as_any().downcast_ref::<TimestampMillisecondArray>() {
        return Ok(TimeColumn::Millis(millis));
    }
    if let Some(micros) = array.as_any().downcast_ref::<TimestampMicrosecondArray>() {
        return Ok(TimeColumn::Micros(micros));
    }
    if let Some(ints) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok(TimeColumn::EpochMillis(ints));
    }
    Err(invalid_input(format!(
        "column '{name}' is neither timestamp nor int64"
    )))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, LoadError> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| invalid_input(format!("column '{name}' is not an int64 column")))
}
