//! Fault injection for exercising compensation paths
//!
//! Both wrappers delegate to a real implementation and fail selected calls
//! on demand. Enabled for this crate's tests and, via the `testing` feature,
//! for dependent crates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lokr_core::types::{ContentBlob, FileId, FileShare, LogicalFile, User, UserId, Visibility};
use lokr_core::utils::hash::Fingerprint;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::backend::{BlobBackend, BlobError, BlobResult, ObjectStoreBackend};
use crate::metadata::{
    BlobRepo, FileRepo, MetadataError, MetadataResult, MetadataStore, ShareRepo, UserRepo,
};

/// Blob backend that can fail or stall on demand
pub struct FaultyBackend {
    inner: Arc<dyn BlobBackend>,
    fail_store: AtomicBool,
    fail_delete: AtomicBool,
    fail_get: AtomicBool,
    /// Artificial latency per call, in milliseconds
    delay_ms: AtomicU64,
    /// `false` parks every `delete` until the gate reopens
    delete_gate: watch::Sender<bool>,
    delete_parked: Notify,
    store_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    bytes_written: AtomicU64,
}

impl std::fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("inner", &self.inner.name())
            .field("store_calls", &self.store_calls())
            .finish()
    }
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn BlobBackend>) -> Self {
        Self {
            inner,
            fail_store: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_get: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            delete_gate: watch::Sender::new(true),
            delete_parked: Notify::new(),
            store_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Wrap a fresh in-memory object store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(ObjectStoreBackend::in_memory(None)))
    }

    pub fn fail_store(&self, fail: bool) {
        self.fail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Park deletes (`true`) or let them through again (`false`)
    pub fn hold_deletes(&self, hold: bool) {
        self.delete_gate.send_replace(!hold);
    }

    /// Wait until a `delete` is parked behind [`hold_deletes`](Self::hold_deletes)
    pub async fn delete_parked(&self) {
        self.delete_parked.notified().await;
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Total bytes handed to successful `store` calls
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn injected(message: &str) -> BlobError {
        BlobError::Unavailable {
            message: format!("injected fault: {}", message),
        }
    }
}

#[async_trait]
impl BlobBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_store.load(Ordering::SeqCst) {
            return Err(Self::injected("store"));
        }
        self.inner.store(key, bytes).await?;
        self.bytes_written.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        self.pause().await;
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.delete_gate.subscribe();
        if !*gate.borrow() {
            self.delete_parked.notify_one();
            let _ = gate.wait_for(|open| *open).await;
        }
        self.pause().await;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        self.pause().await;
        self.inner.exists(key).await
    }
}

/// Metadata store wrapper that can fail selected writes
pub struct FaultyMetadata {
    inner: Arc<dyn MetadataStore>,
    fail_blob_insert: AtomicBool,
    fail_blob_delete: AtomicBool,
    fail_file_insert: AtomicBool,
    fail_adjust_usage: AtomicBool,
}

impl std::fmt::Debug for FaultyMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyMetadata")
            .field("inner", &self.inner.name())
            .finish()
    }
}

impl FaultyMetadata {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            fail_blob_insert: AtomicBool::new(false),
            fail_blob_delete: AtomicBool::new(false),
            fail_file_insert: AtomicBool::new(false),
            fail_adjust_usage: AtomicBool::new(false),
        }
    }

    pub fn fail_blob_insert(&self, fail: bool) {
        self.fail_blob_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_blob_delete(&self, fail: bool) {
        self.fail_blob_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_file_insert(&self, fail: bool) {
        self.fail_file_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_adjust_usage(&self, fail: bool) {
        self.fail_adjust_usage.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> MetadataResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(MetadataError::Unavailable {
                message: format!("injected fault: {}", what),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobRepo for FaultyMetadata {
    async fn get_blob(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<ContentBlob>> {
        self.inner.get_blob(fingerprint).await
    }

    async fn insert_blob(&self, blob: &ContentBlob) -> MetadataResult<()> {
        Self::check(&self.fail_blob_insert, "insert_blob")?;
        self.inner.insert_blob(blob).await
    }

    async fn increment_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        self.inner.increment_blob_ref(fingerprint).await
    }

    async fn decrement_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        self.inner.decrement_blob_ref(fingerprint).await
    }

    async fn claim_orphan(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        self.inner.claim_orphan(fingerprint).await
    }

    async fn release_orphan_claim(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        self.inner.release_orphan_claim(fingerprint).await
    }

    async fn reset_orphan_claims(&self) -> MetadataResult<u64> {
        self.inner.reset_orphan_claims().await
    }

    async fn delete_blob_if_orphaned(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        Self::check(&self.fail_blob_delete, "delete_blob_if_orphaned")?;
        self.inner.delete_blob_if_orphaned(fingerprint).await
    }

    async fn list_orphaned_blobs(&self, limit: usize) -> MetadataResult<Vec<ContentBlob>> {
        self.inner.list_orphaned_blobs(limit).await
    }

    async fn list_blobs(&self) -> MetadataResult<Vec<ContentBlob>> {
        self.inner.list_blobs().await
    }

    async fn set_blob_ref(&self, fingerprint: &Fingerprint, count: u64) -> MetadataResult<bool> {
        self.inner.set_blob_ref(fingerprint, count).await
    }
}

#[async_trait]
impl FileRepo for FaultyMetadata {
    async fn insert_file(&self, file: &LogicalFile) -> MetadataResult<()> {
        Self::check(&self.fail_file_insert, "insert_file")?;
        self.inner.insert_file(file).await
    }

    async fn get_file(&self, id: FileId) -> MetadataResult<Option<LogicalFile>> {
        self.inner.get_file(id).await
    }

    async fn get_file_by_token(&self, token: &str) -> MetadataResult<Option<LogicalFile>> {
        self.inner.get_file_by_token(token).await
    }

    async fn delete_file(&self, id: FileId) -> MetadataResult<bool> {
        self.inner.delete_file(id).await
    }

    async fn list_files_by_owner(&self, owner: &UserId) -> MetadataResult<Vec<LogicalFile>> {
        self.inner.list_files_by_owner(owner).await
    }

    async fn set_share_token(
        &self,
        id: FileId,
        token: Option<&str>,
        visibility: Visibility,
    ) -> MetadataResult<bool> {
        self.inner.set_share_token(id, token, visibility).await
    }

    async fn set_visibility(&self, id: FileId, visibility: Visibility) -> MetadataResult<bool> {
        self.inner.set_visibility(id, visibility).await
    }

    async fn increment_download_count(&self, id: FileId) -> MetadataResult<Option<u64>> {
        self.inner.increment_download_count(id).await
    }

    async fn live_reference_counts(&self) -> MetadataResult<Vec<(Fingerprint, u64)>> {
        self.inner.live_reference_counts().await
    }

    async fn usage_by_owner(&self) -> MetadataResult<Vec<(UserId, u64)>> {
        self.inner.usage_by_owner().await
    }
}

#[async_trait]
impl UserRepo for FaultyMetadata {
    async fn insert_user(&self, user: &User) -> MetadataResult<()> {
        self.inner.insert_user(user).await
    }

    async fn get_user(&self, id: &UserId) -> MetadataResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn adjust_storage_used(&self, id: &UserId, delta: i64) -> MetadataResult<Option<u64>> {
        Self::check(&self.fail_adjust_usage, "adjust_storage_used")?;
        self.inner.adjust_storage_used(id, delta).await
    }

    async fn reserve_storage(&self, id: &UserId, bytes: u64) -> MetadataResult<Option<u64>> {
        Self::check(&self.fail_adjust_usage, "reserve_storage")?;
        self.inner.reserve_storage(id, bytes).await
    }

    async fn set_storage_used(&self, id: &UserId, used: u64) -> MetadataResult<bool> {
        self.inner.set_storage_used(id, used).await
    }

    async fn set_storage_quota(&self, id: &UserId, quota: u64) -> MetadataResult<bool> {
        self.inner.set_storage_quota(id, quota).await
    }

    async fn list_users(&self) -> MetadataResult<Vec<User>> {
        self.inner.list_users().await
    }
}

#[async_trait]
impl ShareRepo for FaultyMetadata {
    async fn upsert_share(&self, share: &FileShare) -> MetadataResult<()> {
        self.inner.upsert_share(share).await
    }

    async fn get_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<Option<FileShare>> {
        self.inner.get_share(file_id, grantee).await
    }

    async fn delete_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<bool> {
        self.inner.delete_share(file_id, grantee).await
    }

    async fn list_shares(&self, file_id: FileId) -> MetadataResult<Vec<FileShare>> {
        self.inner.list_shares(file_id).await
    }

    async fn delete_expired_shares(&self, now: DateTime<Utc>) -> MetadataResult<u64> {
        self.inner.delete_expired_shares(now).await
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadata {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}
