//! S3 event notification parsing.
//!
//! A queue message body arrives in one of two shapes: the S3 event document
//! delivered directly, or the same document JSON-encoded inside an SNS relay
//! envelope. Both normalize to the same list of [`Notification`]s before any
//! business logic sees them.

use serde::Deserialize;
use snafu::prelude::*;
use tracing::warn;

use crate::error::{MalformedBodySnafu, QueueError};

/// Kind of S3 event carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An object was created (`ObjectCreated:*`).
    Created,
    /// An object was removed (`ObjectRemoved:*`).
    Removed,
    /// Any other event name.
    Unknown,
}

impl EventKind {
    fn from_event_name(name: &str) -> Self {
        if name.starts_with("ObjectCreated:") {
            EventKind::Created
        } else if name.starts_with("ObjectRemoved:") {
            EventKind::Removed
        } else {
            EventKind::Unknown
        }
    }
}

/// One parsed object event from a queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Bucket holding the object.
    pub bucket: String,
    /// Full object key (e.g. "klines/BTCUSDT/2025/01/file.parquet").
    pub key: String,
    /// What happened to the object.
    pub event_kind: EventKind,
}

impl Notification {
    /// Only object-creation events reference loadable files.
    pub fn is_loadable(&self) -> bool {
        self.event_kind == EventKind::Created
    }
}

/// A raw message received from the queue.
///
/// The receipt handle must be surrendered via
/// [`MessageQueue::acknowledge`](super::MessageQueue::acknowledge) to prevent
/// redelivery once the visibility timeout elapses.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Transport-assigned message id.
    pub message_id: String,
    /// Opaque token required to delete this message.
    pub receipt_handle: String,
    /// JSON body.
    pub body: String,
}

#[derive(Deserialize)]
struct EventDocument {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName", default)]
    event_name: String,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Deserialize)]
struct ObjectEntity {
    key: String,
}

/// SNS relay wrapper: the S3 event document is JSON-encoded in `Message`.
#[derive(Deserialize)]
struct RelayEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

/// Parse a message body into notifications.
///
/// Returns every event in the body, `Created` or not; filtering happens at
/// the call site via [`Notification::is_loadable`]. A body that is valid JSON
/// but matches neither shape yields an empty list with a logged warning.
/// Invalid JSON (outer or relay-inner) is an error.
pub fn parse_notifications(body: &str) -> Result<Vec<Notification>, QueueError> {
    let value: serde_json::Value = serde_json::from_str(body).context(MalformedBodySnafu)?;

    if value.get("Records").is_some() {
        return parse_event_document(value);
    }

    if value.get("Message").is_some() {
        let envelope: RelayEnvelope =
            serde_json::from_value(value).context(MalformedBodySnafu)?;
        let inner: serde_json::Value =
            serde_json::from_str(&envelope.message).context(MalformedBodySnafu)?;
        if inner.get("Records").is_some() {
            return parse_event_document(inner);
        }
        warn!("Relay-wrapped message carries no event records, skipping");
        return Ok(Vec::new());
    }

    warn!("Unrecognized notification shape, skipping");
    Ok(Vec::new())
}

fn parse_event_document(value: serde_json::Value) -> Result<Vec<Notification>, QueueError> {
    let document: EventDocument = serde_json::from_value(value).context(MalformedBodySnafu)?;

    Ok(document
        .records
        .into_iter()
        .map(|record| Notification {
            event_kind: EventKind::from_event_name(&record.event_name),
            bucket: record.s3.bucket.name,
            key: record.s3.object.key,
        })
        .collect())
}
