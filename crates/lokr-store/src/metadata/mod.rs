//! Metadata store
//!
//! Relational bookkeeping for content blobs, logical files, users and shares.
//! Any implementation must offer two things the content store relies on:
//! atomic increment/decrement of a counter column, and a uniqueness
//! constraint that turns a lost first-insert race into [`MetadataError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lokr_core::error::LokrError;
use lokr_core::types::{ContentBlob, FileId, FileShare, LogicalFile, User, UserId, Visibility};
use lokr_core::utils::hash::Fingerprint;
use thiserror::Error;

pub mod memory;
pub mod sqlite;


pub use memory::MemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// Errors raised by a metadata store
#[derive(Error, Debug)]
pub enum MetadataError {
    /// A uniqueness constraint rejected the write
    #[error("conflict: {what} already exists")]
    Conflict { what: String },

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("corrupt metadata row: {message}")]
    Corrupt { message: String },

    #[error("metadata store unavailable: {message}")]
    Unavailable { message: String },
}

impl MetadataError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MetadataError::Conflict { .. })
    }

    pub(crate) fn conflict(what: impl Into<String>) -> Self {
        MetadataError::Conflict { what: what.into() }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        MetadataError::Corrupt {
            message: message.into(),
        }
    }
}

impl From<MetadataError> for LokrError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Conflict { what } => LokrError::AlreadyExists { resource: what },
            MetadataError::Corrupt { message } => LokrError::ConsistencyFailure { message },
            other => LokrError::storage("metadata store operation failed", other),
        }
    }
}

/// Result type for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Content blob rows and their reference counts
#[async_trait]
pub trait BlobRepo: Send + Sync {
    async fn get_blob(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<ContentBlob>>;

    /// Insert a new blob row; `Conflict` if the fingerprint already has one
    async fn insert_blob(&self, blob: &ContentBlob) -> MetadataResult<()>;

    /// `reference_count = reference_count + 1`; `None` if no row exists or
    /// the row is claimed for removal
    async fn increment_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>>;

    /// `reference_count = max(reference_count - 1, 0)`; `None` if no row exists
    async fn decrement_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>>;

    /// Claim an unreferenced, unclaimed row for removal. While claimed the row
    /// refuses increments. `false` if the row is referenced, claimed or absent.
    async fn claim_orphan(&self, fingerprint: &Fingerprint) -> MetadataResult<bool>;

    /// Drop a removal claim so the row can be referenced again
    async fn release_orphan_claim(&self, fingerprint: &Fingerprint) -> MetadataResult<bool>;

    /// Drop every removal claim (reconciliation only). Returns how many were held.
    async fn reset_orphan_claims(&self) -> MetadataResult<u64>;

    /// Delete the row only while its reference count is still zero
    async fn delete_blob_if_orphaned(&self, fingerprint: &Fingerprint) -> MetadataResult<bool>;

    /// Blobs with no references, oldest first
    async fn list_orphaned_blobs(&self, limit: usize) -> MetadataResult<Vec<ContentBlob>>;

    async fn list_blobs(&self) -> MetadataResult<Vec<ContentBlob>>;

    /// Overwrite a reference count (reconciliation only)
    async fn set_blob_ref(&self, fingerprint: &Fingerprint, count: u64) -> MetadataResult<bool>;
}

/// Logical file rows
#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn insert_file(&self, file: &LogicalFile) -> MetadataResult<()>;

    async fn get_file(&self, id: FileId) -> MetadataResult<Option<LogicalFile>>;

    async fn get_file_by_token(&self, token: &str) -> MetadataResult<Option<LogicalFile>>;

    /// Delete a file row together with its shares
    async fn delete_file(&self, id: FileId) -> MetadataResult<bool>;

    async fn list_files_by_owner(&self, owner: &UserId) -> MetadataResult<Vec<LogicalFile>>;

    /// Set or clear the public share token; `Conflict` if the token is taken
    async fn set_share_token(
        &self,
        id: FileId,
        token: Option<&str>,
        visibility: Visibility,
    ) -> MetadataResult<bool>;

    async fn set_visibility(&self, id: FileId, visibility: Visibility) -> MetadataResult<bool>;

    async fn increment_download_count(&self, id: FileId) -> MetadataResult<Option<u64>>;

    /// Live logical file count per fingerprint
    async fn live_reference_counts(&self) -> MetadataResult<Vec<(Fingerprint, u64)>>;

    /// Sum of logical file sizes per owner
    async fn usage_by_owner(&self) -> MetadataResult<Vec<(UserId, u64)>>;
}

/// User quota rows
#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Insert a user; `Conflict` if the id is taken
    async fn insert_user(&self, user: &User) -> MetadataResult<()>;

    async fn get_user(&self, id: &UserId) -> MetadataResult<Option<User>>;

    /// `storage_used = max(storage_used + delta, 0)`; `None` if no such user
    async fn adjust_storage_used(&self, id: &UserId, delta: i64) -> MetadataResult<Option<u64>>;

    /// `storage_used += bytes` only if the result stays within the quota.
    /// `None` if the user is missing or the bytes do not fit.
    async fn reserve_storage(&self, id: &UserId, bytes: u64) -> MetadataResult<Option<u64>>;

    async fn set_storage_used(&self, id: &UserId, used: u64) -> MetadataResult<bool>;

    async fn set_storage_quota(&self, id: &UserId, quota: u64) -> MetadataResult<bool>;

    async fn list_users(&self) -> MetadataResult<Vec<User>>;
}

/// Per-user share rows
#[async_trait]
pub trait ShareRepo: Send + Sync {
    /// Insert or update the share keyed by (file, grantee)
    async fn upsert_share(&self, share: &FileShare) -> MetadataResult<()>;

    async fn get_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<Option<FileShare>>;

    async fn delete_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<bool>;

    async fn list_shares(&self, file_id: FileId) -> MetadataResult<Vec<FileShare>>;

    /// Remove every share that expired at or before `now`
    async fn delete_expired_shares(&self, now: DateTime<Utc>) -> MetadataResult<u64>;
}

/// Combined metadata store trait
#[async_trait]
pub trait MetadataStore: BlobRepo + FileRepo + UserRepo + ShareRepo + Send + Sync {
    /// Short store name for logs
    fn name(&self) -> &'static str;

    /// Check connectivity
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Saturating conversion for counters persisted as signed integers
pub(crate) fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_int(value: i64, column: &str) -> MetadataResult<u64> {
    u64::try_from(value).map_err(|_| MetadataError::corrupt(format!("negative value {} in {}", value, column)))
}
