//! Integration tests for the loader orchestration.
//!
//! The queue, blob store, and loader collaborators are replaced with
//! in-memory fakes; the loader fake runs the real Parquet decode so
//! malformed buffers fail the same way they do in production.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use tokio_util::sync::CancellationToken;

use flurry::error::{LoadError, QueueError, StorageError};
use flurry::loader::{decode_klines, Loader};
use flurry::queue::{MessageQueue, QueueMessage};
use flurry::storage::BlobStore;
use flurry::LoaderProcess;

// ============ Fakes ============

#[derive(Default)]
struct FakeQueue {
    pending: Mutex<Vec<QueueMessage>>,
    acknowledged: Mutex<Vec<String>>,
}

impl FakeQueue {
    fn with_messages(messages: Vec<QueueMessage>) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(messages),
            acknowledged: Mutex::new(Vec::new()),
        })
    }

    fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageQueue for FakeQueue {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let mut pending = self.pending.lock().unwrap();
        let take = max.min(10).min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn acknowledge(&self, handles: &[String]) {
        self.acknowledged
            .lock()
            .unwrap()
            .extend(handles.iter().cloned());
    }
}

#[derive(Default)]
struct FakeStore {
    objects: HashMap<(String, String), Bytes>,
    gets: Mutex<Vec<String>>,
}

impl FakeStore {
    fn with_objects(objects: Vec<(&str, &str, Bytes)>) -> Arc<Self> {
        Arc::new(Self {
            objects: objects
                .into_iter()
                .map(|(bucket, key, bytes)| ((bucket.to_string(), key.to_string()), bytes))
                .collect(),
            gets: Mutex::new(Vec::new()),
        })
    }

    fn get_count(&self) -> usize {
        self.gets.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for FakeStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.gets.lock().unwrap().push(key.to_string());
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::ObjectStore {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: object_store::Error::NotFound {
                    path: key.to_string(),
                    source: "no such object".into(),
                },
            })
    }

    async fn put(&self, _bucket: &str, _key: &str, _bytes: Bytes) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Runs the real Parquet decode, then records the decoded row count.
#[derive(Default)]
struct FakeLoader {
    loads: Mutex<Vec<usize>>,
}

impl FakeLoader {
    fn load_count(&self) -> usize {
        self.loads.lock().unwrap().len()
    }

    fn total_rows(&self) -> usize {
        self.loads.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Loader for FakeLoader {
    async fn load(&self, buffer: Bytes) -> Result<(), LoadError> {
        let rows = decode_klines(buffer)?;
        self.loads.lock().unwrap().push(rows.len());
        Ok(())
    }
}

// ============ Fixtures ============

fn kline_parquet(symbol: &str, open_ms: i64, close_price: &str) -> Bytes {
    let schema = Arc::new(Schema::new(vec![
        Field::new("symbol", DataType::Utf8, false),
        Field::new(
            "open_time",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("open_price", DataType::Utf8, false),
        Field::new("high_price", DataType::Utf8, false),
        Field::new("low_price", DataType::Utf8, false),
        Field::new("close_price", DataType::Utf8, false),
        Field::new("volume", DataType::Utf8, false),
        Field::new("close_time", DataType::Int64, false),
        Field::new("quote_asset_volume", DataType::Utf8, false),
        Field::new("number_of_trades", DataType::Int64, false),
        Field::new("taker_buy_base_asset_volume", DataType::Utf8, false),
        Field::new("taker_buy_quote_asset_volume", DataType::Utf8, false),
        Field::new("ignore", DataType::Utf8, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![symbol])),
        Arc::new(TimestampMillisecondArray::from(vec![open_ms])),
        Arc::new(StringArray::from(vec!["50000.0"])),
        Arc::new(StringArray::from(vec!["51000.0"])),
        Arc::new(StringArray::from(vec!["49000.0"])),
        Arc::new(StringArray::from(vec![close_price])),
        Arc::new(StringArray::from(vec!["12.5"])),
        Arc::new(Int64Array::from(vec![open_ms + 59_999])),
        Arc::new(StringArray::from(vec!["630000.0"])),
        Arc::new(Int64Array::from(vec![42])),
        Arc::new(StringArray::from(vec!["6.25"])),
        Arc::new(StringArray::from(vec!["315000.0"])),
        Arc::new(StringArray::from(vec!["0"])),
    ];

    let batch = RecordBatch::try_new(schema, columns).unwrap();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    Bytes::from(buf)
}

fn direct_body(event_name: &str, bucket: &str, key: &str) -> String {
    serde_json::json!({
        "Records": [{
            "eventName": event_name,
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key }
            }
        }]
    })
    .to_string()
}

fn message(id: &str, body: String) -> QueueMessage {
    QueueMessage {
        message_id: id.to_string(),
        receipt_handle: format!("handle-{id}"),
        body,
    }
}

fn make_process(
    queue: Arc<FakeQueue>,
    store: Arc<FakeStore>,
    loader: Arc<FakeLoader>,
) -> LoaderProcess {
    LoaderProcess::new(queue, store, loader, 10, Duration::from_secs(1))
}

// ============ Tests ============

#[tokio::test]
async fn test_full_success_acknowledges_every_message() {
    let store = FakeStore::with_objects(vec![
        ("market-data", "klines/a.parquet", kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0")),
        ("market-data", "klines/b.parquet", kline_parquet("ETHUSDT", 1_736_935_200_000, "3000.0")),
        ("market-data", "klines/c.parquet", kline_parquet("SOLUSDT", 1_736_935_200_000, "200.0")),
    ]);
    let queue = FakeQueue::with_messages(vec![
        message("1", direct_body("ObjectCreated:Put", "market-data", "klines/a.parquet")),
        message("2", direct_body("ObjectCreated:Put", "market-data", "klines/b.parquet")),
        message("3", direct_body("ObjectCreated:Put", "market-data", "klines/c.parquet")),
    ]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    assert_eq!(loader.load_count(), 3);
    assert_eq!(loader.total_rows(), 3);
    assert_eq!(
        queue.acknowledged(),
        vec!["handle-1", "handle-2", "handle-3"]
    );
}

#[tokio::test]
async fn test_all_or_nothing_acknowledgment() {
    // File 2 is not valid parquet; its load fails permanently.
    let store = FakeStore::with_objects(vec![
        ("market-data", "klines/a.parquet", kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0")),
        ("market-data", "klines/b.parquet", Bytes::from_static(b"not parquet")),
        ("market-data", "klines/c.parquet", kline_parquet("SOLUSDT", 1_736_935_200_000, "200.0")),
    ]);
    let queue = FakeQueue::with_messages(vec![
        message("1", direct_body("ObjectCreated:Put", "market-data", "klines/a.parquet")),
        message("2", direct_body("ObjectCreated:Put", "market-data", "klines/b.parquet")),
        message("3", direct_body("ObjectCreated:Put", "market-data", "klines/c.parquet")),
    ]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    // Files 1 and 3 still processed (no early abort), but nothing acknowledged.
    assert_eq!(loader.load_count(), 2);
    assert!(queue.acknowledged().is_empty());
}

#[tokio::test]
async fn test_download_failure_blocks_acknowledgment() {
    // The notification references an object that does not exist.
    let store = FakeStore::with_objects(vec![]);
    let queue = FakeQueue::with_messages(vec![message(
        "1",
        direct_body("ObjectCreated:Put", "market-data", "klines/gone.parquet"),
    )]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    assert_eq!(loader.load_count(), 0);
    assert!(queue.acknowledged().is_empty());
}

#[tokio::test]
async fn test_vacuous_success_for_removed_only_message() {
    let store = FakeStore::with_objects(vec![]);
    let queue = FakeQueue::with_messages(vec![message(
        "1",
        direct_body("ObjectRemoved:Delete", "market-data", "klines/a.parquet"),
    )]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    // Nothing downloaded, nothing loaded, message still acknowledged.
    assert_eq!(store.get_count(), 0);
    assert_eq!(loader.load_count(), 0);
    assert_eq!(queue.acknowledged(), vec!["handle-1"]);
}

#[tokio::test]
async fn test_relay_wrapped_message_loads_like_direct() {
    let store = FakeStore::with_objects(vec![(
        "market-data",
        "klines/a.parquet",
        kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0"),
    )]);
    let wrapped = serde_json::json!({
        "Message": direct_body("ObjectCreated:Put", "market-data", "klines/a.parquet")
    })
    .to_string();
    let queue = FakeQueue::with_messages(vec![message("1", wrapped)]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    assert_eq!(loader.load_count(), 1);
    assert_eq!(queue.acknowledged(), vec!["handle-1"]);
}

#[tokio::test]
async fn test_unparseable_body_blocks_acknowledgment_without_aborting() {
    let store = FakeStore::with_objects(vec![(
        "market-data",
        "klines/a.parquet",
        kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0"),
    )]);
    let queue = FakeQueue::with_messages(vec![
        message("1", "{broken json".to_string()),
        message("2", direct_body("ObjectCreated:Put", "market-data", "klines/a.parquet")),
    ]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    // Message 2 still processed, but the batch does not acknowledge.
    assert_eq!(loader.load_count(), 1);
    assert!(queue.acknowledged().is_empty());
}

#[tokio::test]
async fn test_message_with_multiple_created_records() {
    let store = FakeStore::with_objects(vec![
        ("market-data", "klines/a.parquet", kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0")),
        ("market-data", "klines/b.parquet", kline_parquet("ETHUSDT", 1_736_935_200_000, "3000.0")),
    ]);
    let body = serde_json::json!({
        "Records": [
            {
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": "market-data" },
                        "object": { "key": "klines/a.parquet" } }
            },
            {
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": "market-data" },
                        "object": { "key": "klines/b.parquet" } }
            }
        ]
    })
    .to_string();
    let queue = FakeQueue::with_messages(vec![message("1", body)]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    assert_eq!(loader.load_count(), 2);
    assert_eq!(queue.acknowledged(), vec!["handle-1"]);
}

#[tokio::test]
async fn test_empty_queue_is_a_quiet_cycle() {
    let store = FakeStore::with_objects(vec![]);
    let queue = FakeQueue::with_messages(vec![]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.process_batch().await.unwrap();

    assert_eq!(store.get_count(), 0);
    assert_eq!(loader.load_count(), 0);
    assert!(queue.acknowledged().is_empty());
}

#[tokio::test]
async fn test_run_exits_on_cancelled_token() {
    let store = FakeStore::with_objects(vec![]);
    let queue = FakeQueue::with_messages(vec![]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    // A pre-cancelled token stops the loop before any receive.
    process.run(shutdown).await.unwrap();
    assert!(queue.acknowledged().is_empty());
}

#[tokio::test]
async fn test_run_once_processes_a_single_cycle() {
    let store = FakeStore::with_objects(vec![(
        "market-data",
        "klines/a.parquet",
        kline_parquet("BTCUSDT", 1_736_935_200_000, "50000.0"),
    )]);
    let queue = FakeQueue::with_messages(vec![message(
        "1",
        direct_body("ObjectCreated:Put", "market-data", "klines/a.parquet"),
    )]);
    let loader = Arc::new(FakeLoader::default());

    let mut process = make_process(queue.clone(), store.clone(), loader.clone());
    process.run_once().await.unwrap();

    assert_eq!(loader.load_count(), 1);
    assert_eq!(queue.acknowledged(), vec!["handle-1"]);
}
