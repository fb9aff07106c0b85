//! Blob storage for published artifacts and sync state.
//!
//! Everything the mirror writes goes through [`ArtifactStore`]. The production
//! implementation wraps an `object_store` client (S3 or any S3-compatible
//! endpoint); tests and dry runs use the in-memory store.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload, RetryConfig};
use tracing::instrument;

use crate::config::StoreConfig;
use crate::error::{MirrorError, Result};
use crate::log_storage_op;
use crate::logging::LogConfig;

/// Key of the persisted sync state.
pub const STATE_KEY: &str = "state.json";
/// Key of the aggregate feature collection.
pub const FEATURE_COLLECTION_KEY: &str = "all_images.geojson";
/// Key of the tile archive.
pub const TILE_ARCHIVE_KEY: &str = "images.pmtiles";
/// Key of the structured statistics document.
pub const STATS_JSON_KEY: &str = "stats.json";
/// Key of the tabular statistics rendering.
pub const STATS_CSV_KEY: &str = "stats.csv";
/// Prefix under which per-record documents are written.
pub const RECORD_PREFIX: &str = "meta";

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_GEOJSON: &str = "application/geo+json";
pub const CONTENT_TYPE_PMTILES: &str = "application/vnd.pmtiles";
pub const CONTENT_TYPE_CSV: &str = "text/csv";

/// Key of the per-record document for an identifier (identifier used verbatim).
pub fn record_key(identifier: &str) -> String {
    format!("{RECORD_PREFIX}/{identifier}")
}

/// Read/write access to a key-value blob store.
#[async_trait]
pub trait ArtifactStore: Debug + Send + Sync {
    /// Reads an object, returning `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes an object, replacing any previous value.
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

/// [`ArtifactStore`] backed by an `object_store` client.
#[derive(Debug, Clone)]
pub struct ObjectStoreArtifacts {
    store: Arc<dyn ObjectStore>,
    description: String,
    log_config: LogConfig,
}

impl ObjectStoreArtifacts {
    /// Wraps an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, description: impl Into<String>) -> Self {
        Self {
            store,
            description: description.into(),
            log_config: LogConfig::default(),
        }
    }

    /// Builds an S3 (or S3-compatible) store from configuration.
    pub fn s3(config: &StoreConfig) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.bucket())
            .with_region(config.region())
            .with_access_key_id(config.access_key_id())
            .with_secret_access_key(config.secret_access_key().expose())
            .with_retry(RetryConfig {
                max_retries: 3,
                retry_timeout: std::time::Duration::from_secs(60),
                ..Default::default()
            });

        let description = match config.endpoint() {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, "Using custom S3 endpoint");
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
                format!("s3://{} via {endpoint}", config.bucket())
            }
            None => {
                tracing::info!("Using standard AWS S3");
                format!("s3://{}", config.bucket())
            }
        };

        let store = builder.build().map_err(|e| {
            MirrorError::Configuration(format!("Failed to create S3 client: {e}"))
        })?;

        Ok(Self::new(Arc::new(store), description))
    }

    /// An empty in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    /// Overrides the logging configuration.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Human-readable location of the store.
    pub fn description(&self) -> &str {
        &self.description
    }

    fn path(key: &str) -> Result<Path> {
        Path::parse(key).map_err(|e| MirrorError::storage("resolve", key, e.to_string()))
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreArtifacts {
    #[instrument(skip(self), fields(store = %self.description))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = Self::path(key)?;
        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| MirrorError::storage_with_source("get", key, Box::new(e)))?;
                log_storage_op!(self.log_config, key = %key, bytes = bytes.len(), "Fetched object");
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(MirrorError::storage_with_source("get", key, Box::new(e))),
        }
    }

    #[instrument(skip(self, body), fields(store = %self.description, bytes = body.len()))]
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let path = Self::path(key)?;
        let size = body.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(body), options)
            .await
            .map_err(|e| MirrorError::storage_with_source("put", key, Box::new(e)))?;

        log_storage_op!(
            self.log_config,
            key = %key,
            bytes = size,
            content_type = %content_type,
            "Uploaded object"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_uses_identifier_verbatim() {
        assert_eq!(record_key("59e62b8a3d6412ef72209a9c"), "meta/59e62b8a3d6412ef72209a9c");
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = ObjectStoreArtifacts::in_memory();
        assert!(store.get(STATE_KEY).await.unwrap().is_none());

        store
            .put(STATE_KEY, b"{}".to_vec(), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        assert_eq!(store.get(STATE_KEY).await.unwrap(), Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = ObjectStoreArtifacts::in_memory();
        store
            .put(STATS_CSV_KEY, b"a".to_vec(), CONTENT_TYPE_CSV)
            .await
            .unwrap();
        store
            .put(STATS_CSV_KEY, b"b".to_vec(), CONTENT_TYPE_CSV)
            .await
            .unwrap();
        assert_eq!(store.get(STATS_CSV_KEY).await.unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_s3_store_with_endpoint() {
        let config = StoreConfig::new("bucket", "key", "secret")
            .with_endpoint("http://localhost:9000");
        let store = ObjectStoreArtifacts::s3(&config).unwrap();
        assert_eq!(store.description(), "s3://bucket via http://localhost:9000");
    }
}
