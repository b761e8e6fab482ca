//! Local filesystem blob backend
//!
//! Blobs live under a root directory using the sharded key layout
//! (`root/ab/cd/abcd...`). Writes go to a unique temporary file in the
//! target directory and are renamed into place, so concurrent writers of the
//! same key never expose a torn file.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use lokr_core::error::{LokrError, LokrResult};
use std::io::ErrorKind;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{validate_key, BlobBackend, BlobError, BlobResult};

/// Blob backend rooted in a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobBackend {
    /// Root directory for blobs
    root: Utf8PathBuf,
}

impl LocalBlobBackend {
    /// Create a backend rooted at `root`, creating the directory if needed
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> LokrResult<Self> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(&root)
            .map_err(|e| LokrError::io(format!("Failed to create blob directory {}", root), e))?;

        Ok(Self { root })
    }

    /// Get the root path of the backend
    pub fn root_path(&self) -> &Utf8Path {
        &self.root
    }

    fn key_to_path(&self, key: &str) -> BlobResult<Utf8PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn write_atomically(&self, key: &str, path: &Utf8Path, bytes: &[u8]) -> BlobResult<()> {
        let io_err = |source: std::io::Error| BlobError::Io {
            key: key.to_string(),
            source,
        };
        let parent = path.parent().unwrap_or(self.root.as_path());
        let file_name = path.file_name().unwrap_or(key);
        let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        fs::create_dir_all(parent).await.map_err(io_err)?;
        fs::write(&temp, bytes).await.map_err(io_err)?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_err(e));
        }
        Ok(())
    }

    /// Remove now-empty shard directories; concurrent writers may refill them
    async fn prune_empty_parents(&self, path: &Utf8Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root.as_path() || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

#[async_trait]
impl BlobBackend for LocalBlobBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.key_to_path(key)?;

        // A concurrent delete may prune the shard directory between our
        // create_dir_all and the write; one retry recreates it.
        match self.write_atomically(key, &path, bytes).await {
            Err(BlobError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                debug!("Shard directory vanished while storing {}, retrying", key);
                self.write_atomically(key, &path, bytes).await
            }
            other => other,
        }
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.key_to_path(key)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => BlobError::NotFound {
                key: key.to_string(),
            },
            _ => BlobError::Io {
                key: key.to_string(),
                source: e,
            },
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(BlobError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        let path = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}
