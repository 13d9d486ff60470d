//! Seam trait for the notification queue.

use async_trait::async_trait;

use super::notification::QueueMessage;
use crate::error::QueueError;

/// A message queue yielding raw notification messages.
///
/// Implemented by [`SqsQueue`](super::SqsQueue) in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive up to `max` messages, long-polling up to the transport's
    /// bounded wait. An empty queue yields an empty list, not an error.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete the given messages so they are not redelivered.
    ///
    /// Failures are logged, never raised: an unacknowledged message simply
    /// redelivers after the visibility timeout. Empty input is a no-op.
    async fn acknowledge(&self, handles: &[String]);
}
