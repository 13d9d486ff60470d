//! Blob store gateway for S3 reads and writes.
//!
//! Notifications can reference any bucket, so the gateway lazily builds one
//! store per bucket and caches it for the life of the process. Retries are
//! disabled at this layer: a failed download leaves its message
//! unacknowledged, and queue redelivery is the retry mechanism.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{InvalidOptionSnafu, ObjectStoreSnafu, S3ConfigSnafu, StorageError};

/// Read/write access to opaque byte buffers in a bucket+key address space.
///
/// Implemented by [`BlobGateway`] in production and by in-memory fakes in
/// tests.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of an object.
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    /// Write an object, replacing any existing one.
    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), StorageError>;
}

fn no_retry_config() -> RetryConfig {
    let mut retry = RetryConfig::default();
    retry.max_retries = 0;
    retry
}

/// S3 gateway with a per-bucket store cache.
///
/// Builder options come from the environment (`AmazonS3Builder::from_env`)
/// merged with the configured option map, so region, endpoint, and
/// credentials can be supplied either way.
pub struct BlobGateway {
    options: HashMap<String, String>,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BlobGateway {
    /// Create a gateway with the given extra S3 options.
    pub fn new(options: HashMap<String, String>) -> Self {
        Self {
            options,
            stores: RwLock::new(HashMap::new()),
        }
    }

    async fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        {
            let stores = self.stores.read().await;
            if let Some(store) = stores.get(bucket) {
                return Ok(store.clone());
            }
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_retry(no_retry_config());

        for (key, value) in &self.options {
            builder = builder.with_config(
                key.parse()
                    .context(InvalidOptionSnafu { key: key.as_str() })?,
                value.clone(),
            );
        }

        let store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu { bucket })?);

        let mut stores = self.stores.write().await;
        let store = stores
            .entry(bucket.to_string())
            .or_insert(store)
            .clone();
        Ok(store)
    }
}

impl std::fmt::Debug for BlobGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobGateway").finish_non_exhaustive()
    }
}

#[async_trait]
impl BlobStore for BlobGateway {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.store_for(bucket).await?;
        let result = store
            .get(&Path::from(key))
            .await
            .context(ObjectStoreSnafu { bucket, key })?;
        let bytes = result
            .bytes()
            .await
            .context(ObjectStoreSnafu { bucket, key })?;
        Ok(bytes)
    }

    async fn put(&self, bucket: &str, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let store = self.store_for(bucket).await?;
        store
            .put(&Path::from(key), bytes.into())
            .await
            .context(ObjectStoreSnafu { bucket, key })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> HashMap<String, String> {
        HashMap::from([
            ("aws_access_key_id".to_string(), "test".to_string()),
            ("aws_secret_access_key".to_string(), "test".to_string()),
            ("aws_region".to_string(), "us-east-1".to_string()),
        ])
    }

    #[tokio::test]
    async fn test_store_cached_per_bucket() {
        let gateway = BlobGateway::new(test_options());

        let a1 = gateway.store_for("bucket-a").await.unwrap();
        let a2 = gateway.store_for("bucket-a").await.unwrap();
        let b = gateway.store_for("bucket-b").await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2), "Same bucket should reuse the store");
        assert!(!Arc::ptr_eq(&a1, &b), "Different buckets get distinct stores");
    }

    #[tokio::test]
    async fn test_invalid_option_key_rejected() {
        let options = HashMap::from([("not_a_real_option".to_string(), "x".to_string())]);
        let gateway = BlobGateway::new(options);

        let err = gateway.store_for("bucket").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidOption { .. }));
    }
}
