//! Loader orchestration: poll the queue, download, load, acknowledge.
//!
//! One polling cycle receives a batch of notification messages, processes
//! every referenced file strictly in receive order, and acknowledges the
//! whole batch only if every file loaded. A partially-failed batch is left
//! unacknowledged so the transport's visibility timeout redelivers all of
//! it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::LoaderError;
use crate::loader::{ClickHouseLoader, Loader};
use crate::polling::{run_polling_loop, PollingProcessor};
use crate::queue::{parse_notifications, MessageQueue, Notification, QueueMessage, SqsQueue};
use crate::storage::{BlobGateway, BlobStore};

/// Orchestrates the loading pipeline from queue notifications to ClickHouse.
///
/// Owns no persistent state beyond the receipt handles of the batch in
/// flight; all durable state lives in the store and is mutated only by the
/// loader.
pub struct LoaderProcess {
    queue: Arc<dyn MessageQueue>,
    store: Arc<dyn BlobStore>,
    loader: Arc<dyn Loader>,
    max_messages_per_batch: usize,
    poll_interval: Duration,
}

impl LoaderProcess {
    /// Create a process over explicit collaborators.
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn BlobStore>,
        loader: Arc<dyn Loader>,
        max_messages_per_batch: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            loader,
            max_messages_per_batch,
            poll_interval,
        }
    }

    /// Wire up the production collaborators from configuration.
    pub async fn from_config(config: &Config) -> Self {
        let queue = Arc::new(SqsQueue::from_env(&config.queue.url).await);
        let store = Arc::new(BlobGateway::new(config.storage.options.clone()));
        let loader = Arc::new(ClickHouseLoader::new(&config.clickhouse, &config.tables));

        Self::new(
            queue,
            store,
            loader,
            config.queue.max_messages_per_batch,
            Duration::from_secs(config.queue.poll_interval_secs),
        )
    }

    /// Process one batch of queue messages.
    ///
    /// Receive errors propagate: they are fatal to the continuous loop.
    /// Per-message and per-file errors are recorded and only affect whether
    /// the batch acknowledges.
    pub async fn process_batch(&mut self) -> Result<(), LoaderError> {
        if let Some(messages) = self.prepare().await? {
            self.process(messages).await?;
        }
        Ok(())
    }

    async fn handle_messages(&self, messages: &[QueueMessage]) {
        info!(count = messages.len(), "Processing notification batch");

        let mut loaded: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for message in messages {
            match parse_notifications(&message.body) {
                Ok(notifications) => {
                    for notification in notifications.iter().filter(|n| n.is_loadable()) {
                        match self.load_object(notification).await {
                            Ok(()) => loaded.push(notification.key.clone()),
                            Err(e) => {
                                warn!(
                                    bucket = %notification.bucket,
                                    key = %notification.key,
                                    error = %e,
                                    "Failed to load file"
                                );
                                failed.push(notification.key.clone());
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        message_id = %message.message_id,
                        error = %e,
                        "Failed to parse notification message"
                    );
                    failed.push(format!("message:{}", message.message_id));
                }
            }
        }

        if !loaded.is_empty() {
            info!(count = loaded.len(), files = ?loaded, "Successfully loaded files");
        }

        if failed.is_empty() {
            let handles: Vec<String> = messages
                .iter()
                .map(|m| m.receipt_handle.clone())
                .collect();
            self.queue.acknowledge(&handles).await;
            info!(
                count = messages.len(),
                "Acknowledged batch after successful processing"
            );
        } else {
            warn!(
                count = failed.len(),
                files = ?failed,
                "Not acknowledging batch due to failures; messages will be redelivered"
            );
        }
    }

    async fn load_object(&self, notification: &Notification) -> Result<(), LoaderError> {
        info!(
            bucket = %notification.bucket,
            key = %notification.key,
            "Loading file"
        );
        let buffer = self
            .store
            .get(&notification.bucket, &notification.key)
            .await?;
        self.loader.load(buffer).await?;
        Ok(())
    }

    /// Run continuously until the token is cancelled.
    ///
    /// An error from a processing cycle propagates out and ends the loop;
    /// the supervisor is expected to restart the process, which resumes
    /// naturally via redelivery of unacknowledged messages.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), LoaderError> {
        info!(
            max_messages_per_batch = self.max_messages_per_batch,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Starting loader process"
        );
        let poll_interval = self.poll_interval;
        run_polling_loop(self, poll_interval, shutdown).await
    }

    /// Execute exactly one polling cycle, for manual or scheduled runs.
    pub async fn run_once(&mut self) -> Result<(), LoaderError> {
        info!("Running single batch cycle");
        self.process_batch().await
    }
}

#[async_trait]
impl PollingProcessor for LoaderProcess {
    type State = Vec<QueueMessage>;
    type Error = LoaderError;

    async fn prepare(&mut self) -> Result<Option<Self::State>, Self::Error> {
        let messages = self.queue.receive(self.max_messages_per_batch).await?;
        if messages.is_empty() {
            Ok(None)
        } else {
            Ok(Some(messages))
        }
    }

    async fn process(&mut self, messages: Self::State) -> Result<(), Self::Error> {
        self.handle_messages(&messages).await;
        Ok(())
    }
}
