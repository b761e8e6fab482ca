//! Blob backends
//!
//! Raw key→bytes storage. The content store only ever talks to the
//! [`BlobBackend`] trait; which variant sits behind it is decided once at
//! startup from configuration.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use lokr_core::error::{LokrError, LokrResult};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod local;
pub mod object;

pub use local::LocalBlobBackend;
pub use object::ObjectStoreBackend;

/// Errors raised by a blob backend
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob '{key}' not found")]
    NotFound { key: String },

    #[error("blob backend timed out after {after:?} on '{key}'")]
    Timeout { key: String, after: Duration },

    #[error("invalid blob key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("IO error on blob '{key}'")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store error on blob '{key}'")]
    ObjectStore {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("blob backend unavailable: {message}")]
    Unavailable { message: String },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BlobError::Timeout { .. })
    }
}

impl From<BlobError> for LokrError {
    fn from(err: BlobError) -> Self {
        LokrError::storage("blob backend operation failed", err)
    }
}

/// Result type for blob backend operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Raw key→bytes storage capability
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Write `bytes` under `key`, replacing any previous value
    async fn store(&self, key: &str, bytes: &[u8]) -> BlobResult<()>;

    /// Read the bytes under `key`
    async fn get(&self, key: &str) -> BlobResult<Vec<u8>>;

    /// Remove `key`. A missing key is either `Ok` or `NotFound` depending on the backend
    async fn delete(&self, key: &str) -> BlobResult<()>;

    async fn exists(&self, key: &str) -> BlobResult<bool>;
}

/// Where an object-store backend keeps its objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectProvider {
    /// Process-local store, lost on exit
    Memory,
    /// S3 or an S3-compatible service
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint: Option<String>,
        allow_http: bool,
    },
}

/// Backend selection, resolved from configuration at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Local {
        root: Utf8PathBuf,
    },
    ObjectStore {
        provider: ObjectProvider,
        prefix: Option<String>,
    },
}

/// Construct the configured backend
pub fn open_backend(settings: &BackendSettings) -> LokrResult<Arc<dyn BlobBackend>> {
    match settings {
        BackendSettings::Local { root } => Ok(Arc::new(LocalBlobBackend::new(root)?)),
        BackendSettings::ObjectStore { provider, prefix } => {
            let backend = match provider {
                ObjectProvider::Memory => ObjectStoreBackend::in_memory(prefix.clone()),
                ObjectProvider::S3 {
                    bucket,
                    region,
                    endpoint,
                    allow_http,
                } => ObjectStoreBackend::s3(
                    bucket,
                    region.as_deref(),
                    endpoint.as_deref(),
                    *allow_http,
                    prefix.clone(),
                )?,
            };
            Ok(Arc::new(backend))
        }
    }
}

/// Reject keys that could escape the backend root
pub(crate) fn validate_key(key: &str) -> BlobResult<()> {
    let invalid = |reason: &str| BlobError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("empty key"));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(invalid("keys must be relative"));
    }
    if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(invalid("empty or relative path segment"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("ab/cd/abcdef").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("ab/../../etc").is_err());
        assert!(validate_key("ab//cd").is_err());
        assert!(validate_key("ab\\cd").is_err());
    }

    #[test]
    fn test_open_memory_backend() {
        let backend = open_backend(&BackendSettings::ObjectStore {
            provider: ObjectProvider::Memory,
            prefix: None,
        })
        .unwrap();
        assert_eq!(backend.name(), "object-store");
    }

    #[test]
    fn test_blob_error_converts_to_storage_failure() {
        let err: LokrError = BlobError::NotFound {
            key: "ab/cd/abcd".to_string(),
        }
        .into();
        assert!(matches!(err, LokrError::StorageFailure { .. }));
    }
}
