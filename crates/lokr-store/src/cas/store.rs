//! Content store: put/release protocol over a blob backend and a metadata store
//!
//! There is no transaction spanning the two systems. Every step that can
//! fail after a prior step succeeded has an explicit compensating action,
//! and anything compensation cannot repair is left for reconciliation.

use lokr_core::error::LokrError;
use lokr_core::types::{BlobRef, ContentBlob};
use lokr_core::utils::hash::{fingerprint, Fingerprint};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backend::{BlobBackend, BlobError, BlobResult};
use crate::metadata::MetadataStore;
use crate::StoreResult;

/// Deadline applied to backend calls when the caller supplies none
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A put retries when the blob row disappears between lookup and increment,
/// or is claimed by a concurrent removal
const MAX_PUT_ATTEMPTS: u32 = 10;

/// First retry delay; doubles per attempt up to [`MAX_PUT_BACKOFF`]
const PUT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_PUT_BACKOFF: Duration = Duration::from_millis(250);

/// What a release did to the blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other references remain
    Retained { remaining: u64 },
    /// Last reference dropped; bytes and row are gone
    Removed,
    /// Last reference dropped but cleanup failed; left for the orphan sweep
    Deferred,
    /// No blob row existed for the fingerprint
    Missing,
}

/// Result of trying to physically remove one orphan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Removed,
    Deferred,
    /// Re-referenced by a concurrent put before the row could be deleted
    Revived(u64),
    /// Someone else already removed the row
    Gone,
}

/// Deduplicating, reference-counted blob store
#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn BlobBackend>,
    metadata: Arc<dyn MetadataStore>,
    default_deadline: Duration,
}

impl fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStore")
            .field("backend", &self.backend.name())
            .field("metadata", &self.metadata.name())
            .field("default_deadline", &self.default_deadline)
            .finish()
    }
}

impl ContentStore {
    pub fn new(backend: Arc<dyn BlobBackend>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            backend,
            metadata,
            default_deadline: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Override the deadline used for backend calls without an explicit one
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    /// Run a backend call under `deadline` (or the default one)
    pub(crate) async fn timed<T, F>(&self, key: &str, deadline: Option<Duration>, op: F) -> BlobResult<T>
    where
        F: Future<Output = BlobResult<T>>,
    {
        let limit = deadline.unwrap_or(self.default_deadline);
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => Err(BlobError::Timeout {
                key: key.to_string(),
                after: limit,
            }),
        }
    }

    /// Fingerprint `content` and put it
    pub async fn store(&self, content: &[u8]) -> StoreResult<BlobRef> {
        let fp = fingerprint(content);
        self.put(&fp, content, None).await
    }

    /// Add one reference to the blob for `fp`, creating it on first sight.
    ///
    /// Concurrent first puts of the same content converge on one row: the
    /// loser of the insert race falls through to the increment path. A row
    /// claimed for removal refuses the increment, so the put backs off until
    /// the removal finishes and then recreates the blob.
    pub async fn put(
        &self,
        fp: &Fingerprint,
        content: &[u8],
        deadline: Option<Duration>,
    ) -> StoreResult<BlobRef> {
        for attempt in 1..=MAX_PUT_ATTEMPTS {
            if self.metadata.get_blob(fp).await?.is_none() {
                if let Some(created) = self.create_blob(fp, content, deadline).await? {
                    return Ok(created);
                }
                debug!("Lost first-insert race for {}, joining existing blob", fp);
            }

            if let Some(joined) = self.reference_existing(fp, content, deadline).await? {
                return Ok(joined);
            }
            debug!("Blob {} vanished or is being removed (attempt {})", fp, attempt);
            if attempt < MAX_PUT_ATTEMPTS {
                tokio::time::sleep(put_backoff(attempt)).await;
            }
        }

        error!("Could not settle blob row for {} after {} attempts", fp, MAX_PUT_ATTEMPTS);
        Err(LokrError::ConsistencyFailure {
            message: format!("blob row for {} kept disappearing during put", fp),
        })
    }

    /// Write bytes then insert the row. `Ok(None)` when another put won the insert.
    async fn create_blob(
        &self,
        fp: &Fingerprint,
        content: &[u8],
        deadline: Option<Duration>,
    ) -> StoreResult<Option<BlobRef>> {
        let blob = ContentBlob::new(*fp, content.len() as u64);
        let key = blob.storage_key.clone();

        self.timed(&key, deadline, self.backend.store(&key, content))
            .await
            .map_err(|e| {
                warn!("Failed to write blob {}: {}", key, e);
                LokrError::from(e)
            })?;

        match self.metadata.insert_blob(&blob).await {
            Ok(()) => {
                debug!("Created blob {} ({} bytes)", key, blob.byte_size);
                Ok(Some(BlobRef {
                    fingerprint: blob.fingerprint,
                    storage_key: blob.storage_key,
                    byte_size: blob.byte_size,
                    reference_count: blob.reference_count,
                    created: true,
                }))
            }
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => {
                warn!("Inserting blob row for {} failed, rolling back bytes: {}", fp, e);
                self.discard_unclaimed_bytes(fp, &key).await;
                Err(e.into())
            }
        }
    }

    /// Delete bytes we wrote whose row insert failed, unless a concurrent
    /// put has since claimed the key.
    async fn discard_unclaimed_bytes(&self, fp: &Fingerprint, key: &str) {
        match self.metadata.get_blob(fp).await {
            Ok(None) => {}
            Ok(Some(_)) => {
                debug!("Blob {} was claimed concurrently, keeping bytes", key);
                return;
            }
            Err(e) => {
                warn!("Cannot confirm blob {} is unclaimed, leaving bytes: {}", key, e);
                return;
            }
        }
        match self.timed(key, None, self.backend.delete(key)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Compensating delete of {} failed, left for sweep: {}", key, e),
        }
    }

    /// Atomically add a reference. `Ok(None)` if the row does not exist.
    async fn reference_existing(
        &self,
        fp: &Fingerprint,
        content: &[u8],
        deadline: Option<Duration>,
    ) -> StoreResult<Option<BlobRef>> {
        let count = match self.metadata.increment_blob_ref(fp).await? {
            Some(count) => count,
            None => return Ok(None),
        };
        let key = fp.storage_key();

        // 0 -> 1 means we revived an unswept orphan whose bytes may be gone
        if count == 1 {
            if let Err(e) = self.ensure_bytes(&key, content, deadline).await {
                warn!("Reviving orphan {} failed, dropping reference: {}", key, e);
                if let Err(undo) = self.metadata.decrement_blob_ref(fp).await {
                    warn!("Rolling back reference on {} failed: {}", key, undo);
                }
                return Err(e.into());
            }
        }

        debug!("Referenced blob {} (count {})", key, count);
        Ok(Some(BlobRef {
            fingerprint: *fp,
            storage_key: key,
            byte_size: content.len() as u64,
            reference_count: count,
            created: false,
        }))
    }

    async fn ensure_bytes(&self, key: &str, content: &[u8], deadline: Option<Duration>) -> BlobResult<()> {
        if self.timed(key, deadline, self.backend.exists(key)).await? {
            return Ok(());
        }
        info!("Rewriting missing bytes for revived blob {}", key);
        self.timed(key, deadline, self.backend.store(key, content)).await
    }

    /// Drop one reference; the last one also removes bytes and row.
    ///
    /// Cleanup failures after the decrement are logged and reported as
    /// [`ReleaseOutcome::Deferred`], never returned as errors.
    pub async fn release(&self, fp: &Fingerprint) -> StoreResult<ReleaseOutcome> {
        let remaining = match self.metadata.decrement_blob_ref(fp).await? {
            Some(remaining) => remaining,
            None => {
                warn!("Release of unknown blob {}", fp);
                return Ok(ReleaseOutcome::Missing);
            }
        };
        if remaining > 0 {
            debug!("Released blob {} ({} references remain)", fp, remaining);
            return Ok(ReleaseOutcome::Retained { remaining });
        }

        let outcome = match self.remove_orphan(fp, &fp.storage_key()).await {
            Removal::Removed | Removal::Gone => ReleaseOutcome::Removed,
            Removal::Deferred => ReleaseOutcome::Deferred,
            Removal::Revived(remaining) => ReleaseOutcome::Retained { remaining },
        };
        Ok(outcome)
    }

    /// Claim the row, remove the bytes, then the row.
    ///
    /// The claim makes concurrent puts wait instead of joining a blob whose
    /// bytes are about to disappear.
    pub(crate) async fn remove_orphan(&self, fp: &Fingerprint, key: &str) -> Removal {
        match self.metadata.claim_orphan(fp).await {
            Ok(true) => {}
            Ok(false) => return self.unclaimable(fp, key).await,
            Err(e) => {
                warn!("Cannot claim orphan {}, deferring: {}", key, e);
                return Removal::Deferred;
            }
        }

        match self.timed(key, None, self.backend.delete(key)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Orphan {} had no bytes", key),
            Err(e) => {
                warn!("Deleting orphan bytes {} failed, deferring: {}", key, e);
                self.drop_claim(fp, key).await;
                return Removal::Deferred;
            }
        }

        match self.metadata.delete_blob_if_orphaned(fp).await {
            Ok(true) => {
                debug!("Removed blob {}", key);
                Removal::Removed
            }
            Ok(false) => {
                debug!("Orphan row {} was already deleted", key);
                Removal::Gone
            }
            Err(e) => {
                warn!("Deleting orphan row {} failed, deferring: {}", key, e);
                // Unclaimed with its bytes gone, a later put revives it through ensure_bytes
                self.drop_claim(fp, key).await;
                Removal::Deferred
            }
        }
    }

    /// Why a claim was refused: re-referenced, already removed, or held by another remover
    async fn unclaimable(&self, fp: &Fingerprint, key: &str) -> Removal {
        match self.metadata.get_blob(fp).await {
            Ok(Some(blob)) if blob.reference_count > 0 => Removal::Revived(blob.reference_count),
            Ok(Some(_)) => {
                debug!("Orphan {} is being removed elsewhere", key);
                Removal::Gone
            }
            Ok(None) => Removal::Gone,
            Err(e) => {
                warn!("Cannot inspect orphan {}, deferring: {}", key, e);
                Removal::Deferred
            }
        }
    }

    async fn drop_claim(&self, fp: &Fingerprint, key: &str) {
        if let Err(e) = self.metadata.release_orphan_claim(fp).await {
            error!("Releasing removal claim on {} failed; reconcile clears it: {}", key, e);
        }
    }

    /// Read the bytes for a fingerprint
    pub async fn read(&self, fp: &Fingerprint, deadline: Option<Duration>) -> StoreResult<Vec<u8>> {
        let blob = self
            .metadata
            .get_blob(fp)
            .await?
            .ok_or_else(|| LokrError::not_found(format!("blob {}", fp)))?;

        match self.timed(&blob.storage_key, deadline, self.backend.get(&blob.storage_key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => {
                error!("Blob row {} exists but its bytes are missing", blob.storage_key);
                Err(LokrError::ConsistencyFailure {
                    message: format!("bytes for blob {} are missing from the backend", fp),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-hash the stored bytes and compare against the fingerprint
    pub async fn verify(&self, fp: &Fingerprint) -> StoreResult<bool> {
        match self.read(fp, None).await {
            Ok(bytes) => Ok(fingerprint(&bytes) == *fp),
            Err(LokrError::ConsistencyFailure { .. }) | Err(LokrError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the backend holds bytes for the fingerprint
    pub async fn bytes_present(&self, fp: &Fingerprint) -> StoreResult<bool> {
        let key = fp.storage_key();
        Ok(self.timed(&key, None, self.backend.exists(&key)).await?)
    }

    /// Whether a live (referenced) blob exists for the fingerprint
    pub async fn contains(&self, fp: &Fingerprint) -> StoreResult<bool> {
        Ok(self
            .metadata
            .get_blob(fp)
            .await?
            .map(|blob| blob.reference_count > 0)
            .unwrap_or(false))
    }
}

fn put_backoff(attempt: u32) -> Duration {
    PUT_BACKOFF
        .saturating_mul(1 << attempt.saturating_sub(1).min(16))
        .min(MAX_PUT_BACKOFF)
}
