//! Object-store blob backend
//!
//! Wraps any [`object_store::ObjectStore`] (S3-compatible services or the
//! in-process memory store) behind the blob backend trait.

use async_trait::async_trait;
use lokr_core::error::{LokrError, LokrResult};
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

use super::{validate_key, BlobBackend, BlobError, BlobResult};

/// Blob backend over an object store
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    /// Optional key prefix inside the bucket
    prefix: Option<String>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { store, prefix }
    }

    /// Backend over a process-local memory store
    pub fn in_memory(prefix: Option<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), prefix)
    }

    /// Backend over S3 or an S3-compatible endpoint.
    ///
    /// Credentials are taken from the standard `AWS_*` environment variables.
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        allow_http: bool,
        prefix: Option<String>,
    ) -> LokrResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_allow_http(allow_http);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder
            .build()
            .map_err(|e| LokrError::storage(format!("Failed to configure S3 bucket '{}'", bucket), e))?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    fn object_path(&self, key: &str) -> BlobResult<ObjectPath> {
        validate_key(key)?;
        let full = match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        };
        ObjectPath::parse(full).map_err(|e| BlobError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

fn map_object_error(key: &str, err: object_store::Error) -> BlobError {
    match err {
        object_store::Error::NotFound { .. } => BlobError::NotFound {
            key: key.to_string(),
        },
        other => BlobError::ObjectStore {
            key: key.to_string(),
            source: other,
        },
    }
}

#[async_trait]
impl BlobBackend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        "object-store"
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.object_path(key)?;
        self.store
            .put(&path, PutPayload::from(bytes.to_vec()))
            .await
            .map_err(|e| map_object_error(key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.object_path(key)?;
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| map_object_error(key, e))?;
        let bytes = result.bytes().await.map_err(|e| map_object_error(key, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.object_path(key)?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| map_object_error(key, e))
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let path = self.object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_object_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let backend = ObjectStoreBackend::in_memory(Some("/vault/".to_string()));

        backend.store("ab/cd/abcdef", b"hello lokr").await.unwrap();
        assert!(backend.exists("ab/cd/abcdef").await.unwrap());
        assert_eq!(backend.get("ab/cd/abcdef").await.unwrap(), b"hello lokr");

        backend.delete("ab/cd/abcdef").await.unwrap();
        assert!(!backend.exists("ab/cd/abcdef").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(inner.clone(), Some("tenant-a".to_string()));

        backend.store("ab/cd/abcdef", b"x").await.unwrap();
        let raw = inner.head(&ObjectPath::from("tenant-a/ab/cd/abcdef")).await;
        assert!(raw.is_ok());
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let backend = ObjectStoreBackend::in_memory(None);
        assert!(backend.get("ab/cd/missing").await.unwrap_err().is_not_found());
        assert!(!backend.exists("ab/cd/missing").await.unwrap());
    }
}
