//! The `Vault` facade
//!
//! Wires the registry, quota ledger and sharing service over one content
//! store and exposes the vault operations callers use.

use chrono::{DateTime, Utc};
use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::{FileId, FileShare, LogicalFile, Permission, User, UserId, Visibility};
use lokr_core::utils::hash::fingerprint;
use lokr_store::metadata::MetadataStore;
use lokr_store::{ContentStore, SweepReport};
use std::sync::Arc;
use tracing::{debug, error};

use crate::quota::{QuotaLedger, DEFAULT_QUOTA_BYTES};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::registry::{FileRegistry, UploadRequest};
use crate::sharing::{AccessPolicy, PublicShare, SharingService};

/// Orphans removed per sweep batch unless configured otherwise
pub const DEFAULT_ORPHAN_BATCH: usize = 100;

/// Vault-level knobs, usually resolved from `lokr.toml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSettings {
    /// Quota given to users registered without one
    pub default_quota_bytes: u64,
    /// Prefix of public share links
    pub public_base_url: String,
    pub orphan_batch: usize,
    /// Check backend presence of every live blob during reconcile
    pub verify_blobs: bool,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            default_quota_bytes: DEFAULT_QUOTA_BYTES,
            public_base_url: "http://localhost:8080/s".to_string(),
            orphan_batch: DEFAULT_ORPHAN_BATCH,
            verify_blobs: false,
        }
    }
}

/// What to resolve for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget {
    /// A file by id, subject to DOWNLOAD access
    File(FileId),
    /// A public share token
    Token(String),
}

/// Bytes and the metadata needed to serve them
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub file_id: FileId,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Vault {
    content: Arc<ContentStore>,
    metadata: Arc<dyn MetadataStore>,
    quota: QuotaLedger,
    access: AccessPolicy,
    registry: FileRegistry,
    sharing: SharingService,
    settings: VaultSettings,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("content", &self.content)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Vault {
    /// Build a vault over `content`, using its metadata store for every record
    pub fn new(content: Arc<ContentStore>, settings: VaultSettings) -> LokrResult<Self> {
        let metadata = content.metadata().clone();
        let quota = QuotaLedger::new(metadata.clone(), settings.default_quota_bytes);
        let access = AccessPolicy::new(metadata.clone());
        let sharing = SharingService::new(metadata.clone(), &settings.public_base_url)?;
        let registry = FileRegistry::new(content.clone(), quota.clone(), access.clone());
        Ok(Self {
            content,
            metadata,
            quota,
            access,
            registry,
            sharing,
            settings,
        })
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn sharing(&self) -> &SharingService {
        &self.sharing
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub async fn register_user(&self, user: &UserId, quota: Option<u64>) -> LokrResult<User> {
        self.quota.register(user, quota).await
    }

    pub async fn upload_file(&self, request: UploadRequest) -> LokrResult<LogicalFile> {
        self.registry.upload_file(request).await
    }

    pub async fn delete_file(&self, id: FileId, requester: &UserId) -> LokrResult<()> {
        self.registry.delete_file(id, requester).await
    }

    pub async fn get_file(&self, id: FileId, requester: Option<&UserId>) -> LokrResult<LogicalFile> {
        self.registry.get_file(id, requester).await
    }

    pub async fn list_files(&self, owner: &UserId) -> LokrResult<Vec<LogicalFile>> {
        self.registry.list_files(owner).await
    }

    pub async fn create_public_share(&self, id: FileId, owner: &UserId) -> LokrResult<PublicShare> {
        self.sharing.create_public_share(id, owner).await
    }

    pub async fn revoke_public_share(&self, id: FileId, owner: &UserId) -> LokrResult<()> {
        self.sharing.revoke_public_share(id, owner).await
    }

    pub async fn share_with_user(
        &self,
        id: FileId,
        grantee: &UserId,
        permission: Permission,
        expires_at: Option<DateTime<Utc>>,
        owner: &UserId,
    ) -> LokrResult<FileShare> {
        self.sharing
            .share_with_user(id, grantee, permission, expires_at, owner)
            .await
    }

    pub async fn revoke_share(&self, id: FileId, grantee: &UserId, owner: &UserId) -> LokrResult<()> {
        self.sharing.revoke_share(id, grantee, owner).await
    }

    pub async fn list_shares(&self, id: FileId, owner: &UserId) -> LokrResult<Vec<FileShare>> {
        self.sharing.list_shares(id, owner).await
    }

    /// Load a file's bytes for download.
    ///
    /// A file id needs DOWNLOAD access. A token must belong to a file that is
    /// still PUBLIC; each successful token resolve counts one download.
    pub async fn resolve(&self, target: ResolveTarget, requester: Option<&UserId>) -> LokrResult<ResolvedFile> {
        match target {
            ResolveTarget::File(id) => {
                let file = self
                    .metadata
                    .get_file(id)
                    .await?
                    .ok_or_else(|| LokrError::not_found(format!("file {}", id)))?;
                self.access.authorize(&file, requester, Permission::Download).await?;
                self.load_bytes(file).await
            }
            ResolveTarget::Token(token) => {
                let file = self
                    .metadata
                    .get_file_by_token(&token)
                    .await?
                    .filter(|f| f.visibility == Visibility::Public)
                    .ok_or_else(|| LokrError::not_found("share link"))?;
                let id = file.id;
                let resolved = self.load_bytes(file).await?;
                match self.metadata.increment_download_count(id).await? {
                    Some(count) => debug!("File {} downloaded {} times", id, count),
                    None => return Err(LokrError::not_found(format!("file {}", id))),
                }
                Ok(resolved)
            }
        }
    }

    async fn load_bytes(&self, file: LogicalFile) -> LokrResult<ResolvedFile> {
        let bytes = self.content.read(&file.fingerprint, None).await?;
        if fingerprint(&bytes) != file.fingerprint {
            error!("Stored bytes for {} do not match fingerprint {}", file.id, file.fingerprint);
            return Err(LokrError::ConsistencyFailure {
                message: format!("content of file {} is corrupt", file.id),
            });
        }
        Ok(ResolvedFile {
            file_id: file.id,
            filename: file.display_name,
            mime_type: file.mime_type,
            bytes,
        })
    }

    /// Repair reference counts and usage, purge expired shares, sweep orphans
    pub async fn reconcile(&self) -> LokrResult<ReconcileReport> {
        Reconciler {
            content: &self.content,
            orphan_batch: self.settings.orphan_batch,
            verify_blobs: self.settings.verify_blobs,
        }
        .run()
        .await
    }

    /// One orphan sweep batch
    pub async fn sweep(&self) -> LokrResult<SweepReport> {
        self.content.cleanup_orphaned(self.settings.orphan_batch).await
    }
}
