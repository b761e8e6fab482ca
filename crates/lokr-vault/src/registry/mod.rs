//! Logical file registry
//!
//! Owns the upload and delete protocols tying the content store, the quota
//! ledger and the file rows together. Each protocol runs on its own task so a
//! caller that goes away mid-upload cannot leave it half applied: the task
//! either finishes or runs its compensation to completion.

use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::{FileId, LogicalFile, Permission, UserId};
use lokr_core::utils::hash::{fingerprint, Fingerprint};
use lokr_core::utils::mime::{check_mime, normalize_mime};
use lokr_store::metadata::MetadataStore;
use lokr_store::ContentStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::quota::QuotaLedger;
use crate::sharing::AccessPolicy;

#[cfg(test)]
mod tests;

/// Longest accepted display name, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Per-upload knobs
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Deadline for each blob backend call; the store default when `None`
    pub deadline: Option<Duration>,
}

/// Everything needed to upload one file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner: UserId,
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub options: UploadOptions,
}

impl UploadRequest {
    pub fn new(
        owner: UserId,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            owner,
            name: name.into(),
            mime_type: mime_type.into(),
            content,
            options: UploadOptions::default(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }
}

/// Validate a display name
pub fn validate_name(name: &str) -> LokrResult<()> {
    if name.trim().is_empty() {
        return Err(LokrError::validation("name", "file name cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LokrError::validation(
            "name",
            format!("file name exceeds {} bytes", MAX_NAME_LEN),
        ));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(LokrError::validation(
            "name",
            "file name cannot contain path separators or control characters",
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct FileRegistry {
    content: Arc<ContentStore>,
    metadata: Arc<dyn MetadataStore>,
    quota: QuotaLedger,
    access: AccessPolicy,
}

impl FileRegistry {
    pub fn new(content: Arc<ContentStore>, quota: QuotaLedger, access: AccessPolicy) -> Self {
        let metadata = content.metadata().clone();
        Self {
            content,
            metadata,
            quota,
            access,
        }
    }

    /// Upload a file. Rejected uploads leave no reference or charge behind.
    pub async fn upload_file(&self, request: UploadRequest) -> LokrResult<LogicalFile> {
        let registry = self.clone();
        tokio::spawn(async move { registry.run_upload(request).await })
            .await
            .map_err(|e| LokrError::storage("upload task failed", e))?
    }

    async fn run_upload(&self, request: UploadRequest) -> LokrResult<LogicalFile> {
        let UploadRequest {
            owner,
            name,
            mime_type,
            content,
            options,
        } = request;

        let size = content.len() as u64;
        if size == 0 {
            return Err(LokrError::InvalidSize { size });
        }
        let delta = i64::try_from(size).map_err(|_| LokrError::InvalidSize { size })?;
        validate_name(&name)?;
        check_mime(&content, &mime_type)?;

        let fp = fingerprint(&content);
        let blob = self.content.put(&fp, &content, options.deadline).await?;
        debug!(
            "Upload of {} by {} put blob {} (count {})",
            name, owner, blob.storage_key, blob.reference_count
        );

        if let Err(e) = self.quota.reserve(&owner, size).await {
            self.release_quietly(&fp, "quota rejection").await;
            return Err(e);
        }

        let file = LogicalFile::new(owner, fp, name, normalize_mime(&mime_type), size);
        if let Err(e) = self.metadata.insert_file(&file).await {
            self.release_quietly(&fp, "file insert failure").await;
            if let Err(refund) = self.quota.charge(&file.owner_id, -delta).await {
                warn!(
                    "Refunding {} bytes to {} failed; reconcile will correct usage: {}",
                    size, file.owner_id, refund
                );
            }
            return Err(LokrError::storage(
                format!("Failed to record file '{}'", file.display_name),
                e,
            ));
        }

        info!("Uploaded {} ({} bytes) as {}", file.display_name, size, file.id);
        Ok(file)
    }

    /// Undo a put; failures are logged and left for reconciliation
    async fn release_quietly(&self, fp: &Fingerprint, reason: &str) {
        match self.content.release(fp).await {
            Ok(outcome) => debug!("Released {} after {}: {:?}", fp, reason, outcome),
            Err(e) => warn!("Rollback of {} after {} failed: {}", fp, reason, e),
        }
    }

    /// Delete a file as its owner or as a holder of a DELETE share
    pub async fn delete_file(&self, id: FileId, requester: &UserId) -> LokrResult<()> {
        let registry = self.clone();
        let requester = requester.clone();
        tokio::spawn(async move { registry.run_delete(id, &requester).await })
            .await
            .map_err(|e| LokrError::storage("delete task failed", e))?
    }

    async fn run_delete(&self, id: FileId, requester: &UserId) -> LokrResult<()> {
        let file = self.load(id).await?;
        self.access
            .authorize(&file, Some(requester), Permission::Delete)
            .await?;

        if !self.metadata.delete_file(id).await? {
            return Err(LokrError::not_found(format!("file {}", id)));
        }

        match self.content.release(&file.fingerprint).await {
            Ok(outcome) => debug!("Released blob of {}: {:?}", id, outcome),
            Err(e) => warn!("Releasing blob of {} failed; reconcile will correct: {}", id, e),
        }

        let size = i64::try_from(file.byte_size).unwrap_or(i64::MAX);
        if let Err(e) = self.quota.charge(&file.owner_id, -size).await {
            warn!(
                "Crediting {} bytes to {} failed; reconcile will correct usage: {}",
                file.byte_size, file.owner_id, e
            );
        }

        info!("Deleted {} ({})", file.display_name, id);
        Ok(())
    }

    async fn load(&self, id: FileId) -> LokrResult<LogicalFile> {
        self.metadata
            .get_file(id)
            .await?
            .ok_or_else(|| LokrError::not_found(format!("file {}", id)))
    }

    /// File metadata, if the requester may view it
    pub async fn get_file(&self, id: FileId, requester: Option<&UserId>) -> LokrResult<LogicalFile> {
        let file = self.load(id).await?;
        self.access.authorize(&file, requester, Permission::View).await?;
        Ok(file)
    }

    pub async fn list_files(&self, owner: &UserId) -> LokrResult<Vec<LogicalFile>> {
        Ok(self.metadata.list_files_by_owner(owner).await?)
    }
}
