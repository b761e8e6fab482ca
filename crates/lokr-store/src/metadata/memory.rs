//! In-memory metadata store
//!
//! DashMap-backed tables for tests and ephemeral vaults. Counter updates go
//! through `get_mut`, which holds the shard lock for the whole
//! read-modify-write. Code touching both `tokens` and `files` takes the
//! `tokens` entry first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lokr_core::types::{ContentBlob, FileId, FileShare, LogicalFile, User, UserId, Visibility};
use lokr_core::utils::hash::Fingerprint;
use std::collections::HashMap;

use super::{BlobRepo, FileRepo, MetadataError, MetadataResult, MetadataStore, ShareRepo, UserRepo};

/// Metadata store held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    blobs: DashMap<Fingerprint, BlobRow>,
    files: DashMap<FileId, LogicalFile>,
    /// share token -> file
    tokens: DashMap<String, FileId>,
    users: DashMap<UserId, User>,
    shares: DashMap<(FileId, UserId), FileShare>,
}

#[derive(Debug, Clone)]
struct BlobRow {
    blob: ContentBlob,
    /// Claimed for removal; increments are refused
    claimed: bool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobRepo for MemoryMetadataStore {
    async fn get_blob(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<ContentBlob>> {
        Ok(self.blobs.get(fingerprint).map(|row| row.blob.clone()))
    }

    async fn insert_blob(&self, blob: &ContentBlob) -> MetadataResult<()> {
        match self.blobs.entry(blob.fingerprint) {
            Entry::Occupied(_) => Err(MetadataError::conflict(format!("blob {}", blob.fingerprint))),
            Entry::Vacant(slot) => {
                slot.insert(BlobRow {
                    blob: blob.clone(),
                    claimed: false,
                });
                Ok(())
            }
        }
    }

    async fn increment_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        Ok(self
            .blobs
            .get_mut(fingerprint)
            .filter(|row| !row.claimed)
            .map(|mut row| {
                row.blob.reference_count = row.blob.reference_count.saturating_add(1);
                row.blob.reference_count
            }))
    }

    async fn decrement_blob_ref(&self, fingerprint: &Fingerprint) -> MetadataResult<Option<u64>> {
        Ok(self.blobs.get_mut(fingerprint).map(|mut row| {
            row.blob.reference_count = row.blob.reference_count.saturating_sub(1);
            row.blob.reference_count
        }))
    }

    async fn claim_orphan(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        Ok(match self.blobs.get_mut(fingerprint) {
            Some(mut row) if row.blob.reference_count == 0 && !row.claimed => {
                row.claimed = true;
                true
            }
            _ => false,
        })
    }

    async fn release_orphan_claim(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        Ok(self
            .blobs
            .get_mut(fingerprint)
            .map(|mut row| row.claimed = false)
            .is_some())
    }

    async fn reset_orphan_claims(&self) -> MetadataResult<u64> {
        let mut released = 0;
        for mut row in self.blobs.iter_mut() {
            if row.claimed {
                row.claimed = false;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn delete_blob_if_orphaned(&self, fingerprint: &Fingerprint) -> MetadataResult<bool> {
        Ok(self
            .blobs
            .remove_if(fingerprint, |_, row| row.blob.reference_count == 0)
            .is_some())
    }

    async fn list_orphaned_blobs(&self, limit: usize) -> MetadataResult<Vec<ContentBlob>> {
        let mut orphans: Vec<ContentBlob> = self
            .blobs
            .iter()
            .filter(|row| row.blob.is_orphaned())
            .map(|row| row.blob.clone())
            .collect();
        orphans.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.fingerprint.to_hex().cmp(&b.fingerprint.to_hex()))
        });
        orphans.truncate(limit);
        Ok(orphans)
    }

    async fn list_blobs(&self) -> MetadataResult<Vec<ContentBlob>> {
        let mut blobs: Vec<ContentBlob> = self.blobs.iter().map(|row| row.blob.clone()).collect();
        blobs.sort_by_key(|b| b.fingerprint.to_hex());
        Ok(blobs)
    }

    async fn set_blob_ref(&self, fingerprint: &Fingerprint, count: u64) -> MetadataResult<bool> {
        Ok(self
            .blobs
            .get_mut(fingerprint)
            .map(|mut row| row.blob.reference_count = count)
            .is_some())
    }
}

#[async_trait]
impl FileRepo for MemoryMetadataStore {
    async fn insert_file(&self, file: &LogicalFile) -> MetadataResult<()> {
        if !self.users.contains_key(&file.owner_id) {
            return Err(MetadataError::Unavailable {
                message: format!("owner {} does not exist", file.owner_id),
            });
        }
        if !self.blobs.contains_key(&file.fingerprint) {
            return Err(MetadataError::Unavailable {
                message: format!("blob {} does not exist", file.fingerprint),
            });
        }
        let token_slot = match &file.share_token {
            Some(token) => match self.tokens.entry(token.clone()) {
                Entry::Occupied(_) => return Err(MetadataError::conflict("share token")),
                Entry::Vacant(slot) => Some(slot),
            },
            None => None,
        };
        match self.files.entry(file.id) {
            Entry::Occupied(_) => Err(MetadataError::conflict(format!("file {}", file.id))),
            Entry::Vacant(slot) => {
                if let Some(token_slot) = token_slot {
                    token_slot.insert(file.id);
                }
                slot.insert(file.clone());
                Ok(())
            }
        }
    }

    async fn get_file(&self, id: FileId) -> MetadataResult<Option<LogicalFile>> {
        Ok(self.files.get(&id).map(|f| f.clone()))
    }

    async fn get_file_by_token(&self, token: &str) -> MetadataResult<Option<LogicalFile>> {
        let id = match self.tokens.get(token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self
            .files
            .get(&id)
            .filter(|f| f.share_token.as_deref() == Some(token))
            .map(|f| f.clone()))
    }

    async fn delete_file(&self, id: FileId) -> MetadataResult<bool> {
        let removed = match self.files.remove(&id) {
            Some((_, file)) => file,
            None => return Ok(false),
        };
        if let Some(token) = &removed.share_token {
            self.tokens.remove_if(token, |_, owner| *owner == id);
        }
        self.shares.retain(|(file_id, _), _| *file_id != id);
        Ok(true)
    }

    async fn list_files_by_owner(&self, owner: &UserId) -> MetadataResult<Vec<LogicalFile>> {
        let mut files: Vec<LogicalFile> = self
            .files
            .iter()
            .filter(|f| &f.owner_id == owner)
            .map(|f| f.clone())
            .collect();
        files.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        });
        Ok(files)
    }

    async fn set_share_token(
        &self,
        id: FileId,
        token: Option<&str>,
        visibility: Visibility,
    ) -> MetadataResult<bool> {
        let mut claimed = false;
        if let Some(token) = token {
            match self.tokens.entry(token.to_string()) {
                Entry::Occupied(existing) if *existing.get() != id => {
                    return Err(MetadataError::conflict("share token"));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(id);
                    claimed = true;
                }
            }
        }

        let previous = match self.files.get_mut(&id) {
            Some(mut file) => {
                let previous = file.share_token.take();
                file.share_token = token.map(str::to_string);
                file.visibility = visibility;
                previous
            }
            None => {
                if let (true, Some(token)) = (claimed, token) {
                    self.tokens.remove_if(token, |_, owner| *owner == id);
                }
                return Ok(false);
            }
        };

        if let Some(old) = previous {
            if token != Some(old.as_str()) {
                self.tokens.remove_if(&old, |_, owner| *owner == id);
            }
        }
        Ok(true)
    }

    async fn set_visibility(&self, id: FileId, visibility: Visibility) -> MetadataResult<bool> {
        Ok(self
            .files
            .get_mut(&id)
            .map(|mut file| file.visibility = visibility)
            .is_some())
    }

    async fn increment_download_count(&self, id: FileId) -> MetadataResult<Option<u64>> {
        Ok(self.files.get_mut(&id).map(|mut file| {
            file.download_count = file.download_count.saturating_add(1);
            file.download_count
        }))
    }

    async fn live_reference_counts(&self) -> MetadataResult<Vec<(Fingerprint, u64)>> {
        let mut counts: HashMap<Fingerprint, u64> = HashMap::new();
        for file in self.files.iter() {
            *counts.entry(file.fingerprint).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by_key(|(fp, _)| fp.to_hex());
        Ok(counts)
    }

    async fn usage_by_owner(&self) -> MetadataResult<Vec<(UserId, u64)>> {
        let mut usage: HashMap<UserId, u64> = HashMap::new();
        for file in self.files.iter() {
            let used = usage.entry(file.owner_id.clone()).or_default();
            *used = used.saturating_add(file.byte_size);
        }
        let mut usage: Vec<_> = usage.into_iter().collect();
        usage.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        Ok(usage)
    }
}

#[async_trait]
impl UserRepo for MemoryMetadataStore {
    async fn insert_user(&self, user: &User) -> MetadataResult<()> {
        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => Err(MetadataError::conflict(format!("user {}", user.id))),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn get_user(&self, id: &UserId) -> MetadataResult<Option<User>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn adjust_storage_used(&self, id: &UserId, delta: i64) -> MetadataResult<Option<u64>> {
        Ok(self.users.get_mut(id).map(|mut user| {
            user.storage_used = if delta >= 0 {
                user.storage_used.saturating_add(delta.unsigned_abs())
            } else {
                user.storage_used.saturating_sub(delta.unsigned_abs())
            };
            user.storage_used
        }))
    }

    async fn reserve_storage(&self, id: &UserId, bytes: u64) -> MetadataResult<Option<u64>> {
        Ok(self.users.get_mut(id).and_then(|mut user| {
            let used = user
                .storage_used
                .checked_add(bytes)
                .filter(|used| *used <= user.storage_quota)?;
            user.storage_used = used;
            Some(used)
        }))
    }

    async fn set_storage_used(&self, id: &UserId, used: u64) -> MetadataResult<bool> {
        Ok(self
            .users
            .get_mut(id)
            .map(|mut user| user.storage_used = used)
            .is_some())
    }

    async fn set_storage_quota(&self, id: &UserId, quota: u64) -> MetadataResult<bool> {
        Ok(self
            .users
            .get_mut(id)
            .map(|mut user| user.storage_quota = quota)
            .is_some())
    }

    async fn list_users(&self) -> MetadataResult<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(users)
    }
}

#[async_trait]
impl ShareRepo for MemoryMetadataStore {
    async fn upsert_share(&self, share: &FileShare) -> MetadataResult<()> {
        if !self.files.contains_key(&share.file_id) {
            return Err(MetadataError::Unavailable {
                message: format!("file {} does not exist", share.file_id),
            });
        }
        self.shares
            .insert((share.file_id, share.grantee_id.clone()), share.clone());
        Ok(())
    }

    async fn get_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<Option<FileShare>> {
        Ok(self
            .shares
            .get(&(file_id, grantee.clone()))
            .map(|s| s.clone()))
    }

    async fn delete_share(&self, file_id: FileId, grantee: &UserId) -> MetadataResult<bool> {
        Ok(self.shares.remove(&(file_id, grantee.clone())).is_some())
    }

    async fn list_shares(&self, file_id: FileId) -> MetadataResult<Vec<FileShare>> {
        let mut shares: Vec<FileShare> = self
            .shares
            .iter()
            .filter(|s| s.file_id == file_id)
            .map(|s| s.clone())
            .collect();
        shares.sort_by(|a, b| a.grantee_id.as_str().cmp(b.grantee_id.as_str()));
        Ok(shares)
    }

    async fn delete_expired_shares(&self, now: DateTime<Utc>) -> MetadataResult<u64> {
        let mut removed = 0u64;
        self.shares.retain(|_, share| {
            let expired = share.is_expired_at(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> MetadataResult<()> {
        Ok(())
    }
}
