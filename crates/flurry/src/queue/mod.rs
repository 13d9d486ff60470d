//! Notification source: SQS transport plus envelope parsing.

mod notification;
mod traits;

pub use notification::{parse_notifications, EventKind, Notification, QueueMessage};
pub use traits::MessageQueue;

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::DeleteMessageBatchRequestEntry;
use snafu::prelude::*;
use tracing::{debug, warn};

use crate::error::{QueueError, ReceiveSnafu};

/// SQS caps both receive and delete batches at 10 entries.
const TRANSPORT_BATCH_LIMIT: usize = 10;

/// Long-poll wait for receive calls, in seconds.
const WAIT_TIME_SECS: i32 = 20;

/// SQS-backed notification queue.
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    /// Create a queue over an existing SQS client.
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a queue client from the ambient AWS environment
    /// (credentials chain, region, endpoint overrides).
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_sqs::Client::new(&config), queue_url)
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError> {
        let max = max.min(TRANSPORT_BATCH_LIMIT);

        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max as i32)
            .wait_time_seconds(WAIT_TIME_SECS)
            .send()
            .await
            .context(ReceiveSnafu {
                queue_url: self.queue_url.clone(),
            })?;

        let messages: Vec<QueueMessage> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                // A message without a receipt handle cannot be acknowledged;
                // skip it and let the transport redeliver.
                let receipt_handle = message.receipt_handle?;
                Some(QueueMessage {
                    message_id: message.message_id.unwrap_or_default(),
                    receipt_handle,
                    body: message.body.unwrap_or_default(),
                })
            })
            .collect();

        debug!(count = messages.len(), "Received messages from queue");
        Ok(messages)
    }

    async fn acknowledge(&self, handles: &[String]) {
        if handles.is_empty() {
            return;
        }

        for chunk in handles.chunks(TRANSPORT_BATCH_LIMIT) {
            let entries: Vec<DeleteMessageBatchRequestEntry> = chunk
                .iter()
                .enumerate()
                .filter_map(|(i, handle)| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(handle)
                        .build()
                        .ok()
                })
                .collect();

            match self
                .client
                .delete_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
            {
                Ok(output) => {
                    for failed in output.failed() {
                        warn!(
                            id = %failed.id(),
                            code = %failed.code(),
                            "Failed to delete message"
                        );
                    }
                }
                Err(e) => {
                    // The whole sub-batch failed; keep going with the rest.
                    // Undeleted messages redeliver after the visibility timeout.
                    warn!(
                        error = %DisplayErrorContext(&e),
                        "Failed to delete message batch"
                    );
                }
            }
        }

        debug!(count = handles.len(), "Acknowledged messages");
    }
}
