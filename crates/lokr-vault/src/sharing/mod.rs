//! Sharing authorization
//!
//! Public tokens and per-user grants layered over logical files, plus the
//! access predicate every read and delete path goes through.

use chrono::{DateTime, Utc};
use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::{FileId, FileShare, LogicalFile, Permission, UserId, Visibility};
use lokr_store::metadata::MetadataStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub mod token;

#[cfg(test)]
mod tests;

pub use token::generate_token;

/// Fresh tokens tried before giving up on a uniqueness collision
const TOKEN_ATTEMPTS: usize = 3;

/// A public share link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicShare {
    pub file_id: FileId,
    pub token: String,
    pub url: Url,
}

/// Whether `requester` may perform `action` on `file`.
///
/// Owners may do anything. A PUBLIC file may be viewed or downloaded by
/// anyone. Otherwise a live share with exactly `action` is required.
pub fn permits(
    file: &LogicalFile,
    requester: Option<&UserId>,
    action: Permission,
    share: Option<&FileShare>,
    now: DateTime<Utc>,
) -> bool {
    if requester.map(|r| file.is_owned_by(r)).unwrap_or(false) {
        return true;
    }
    if file.visibility == Visibility::Public && matches!(action, Permission::View | Permission::Download) {
        return true;
    }
    share
        .filter(|s| Some(&s.grantee_id) == requester)
        .map(|s| s.grants(action, now))
        .unwrap_or(false)
}

/// Loads the share row a decision needs and applies [`permits`]
#[derive(Clone)]
pub struct AccessPolicy {
    metadata: Arc<dyn MetadataStore>,
}

impl AccessPolicy {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn authorize(
        &self,
        file: &LogicalFile,
        requester: Option<&UserId>,
        action: Permission,
    ) -> LokrResult<()> {
        let now = Utc::now();
        if permits(file, requester, action, None, now) {
            return Ok(());
        }
        let share = match requester {
            Some(requester) => self.metadata.get_share(file.id, requester).await?,
            None => None,
        };
        if permits(file, requester, action, share.as_ref(), now) {
            return Ok(());
        }
        debug!(
            "Denied {} on {} to {}",
            action,
            file.id,
            requester.map(|r| r.as_str()).unwrap_or("anonymous")
        );
        Err(LokrError::forbidden(
            action.as_str().to_ascii_lowercase(),
            format!("file {}", file.id),
        ))
    }
}

/// Share management for file owners
#[derive(Clone)]
pub struct SharingService {
    metadata: Arc<dyn MetadataStore>,
    public_base: Url,
}

impl SharingService {
    /// `public_base_url` is the prefix public links are built from
    pub fn new(metadata: Arc<dyn MetadataStore>, public_base_url: &str) -> LokrResult<Self> {
        let public_base = Url::parse(public_base_url)
            .map_err(|e| LokrError::validation("public_base_url", e.to_string()))?;
        if public_base.cannot_be_a_base() {
            return Err(LokrError::validation(
                "public_base_url",
                format!("'{}' cannot be used as a base URL", public_base_url),
            ));
        }
        Ok(Self {
            metadata,
            public_base,
        })
    }

    /// `{public_base_url}/{token}`
    pub fn public_url(&self, token: &str) -> LokrResult<Url> {
        let mut url = self.public_base.clone();
        url.path_segments_mut()
            .map_err(|_| LokrError::validation("public_base_url", "cannot be a base"))?
            .pop_if_empty()
            .push(token);
        Ok(url)
    }

    async fn load_owned(&self, file_id: FileId, owner: &UserId, action: &str) -> LokrResult<LogicalFile> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| LokrError::not_found(format!("file {}", file_id)))?;
        if !file.is_owned_by(owner) {
            return Err(LokrError::forbidden(action, format!("file {}", file_id)));
        }
        Ok(file)
    }

    /// Publish a file under a random token. An already-published file keeps its token.
    pub async fn create_public_share(&self, file_id: FileId, owner: &UserId) -> LokrResult<PublicShare> {
        let file = self.load_owned(file_id, owner, "publish").await?;

        if let Some(token) = file.share_token {
            if file.visibility != Visibility::Public {
                self.metadata
                    .set_share_token(file_id, Some(&token), Visibility::Public)
                    .await?;
            }
            let url = self.public_url(&token)?;
            return Ok(PublicShare { file_id, token, url });
        }

        for attempt in 1..=TOKEN_ATTEMPTS {
            let token = generate_token();
            match self
                .metadata
                .set_share_token(file_id, Some(&token), Visibility::Public)
                .await
            {
                Ok(true) => {
                    info!("Published file {}", file_id);
                    let url = self.public_url(&token)?;
                    return Ok(PublicShare { file_id, token, url });
                }
                Ok(false) => return Err(LokrError::not_found(format!("file {}", file_id))),
                Err(e) if e.is_conflict() => {
                    warn!("Share token collision on attempt {}, retrying", attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LokrError::ConsistencyFailure {
            message: format!("could not allocate a unique share token for file {}", file_id),
        })
    }

    /// Clear the public token; the file becomes PRIVATE
    pub async fn revoke_public_share(&self, file_id: FileId, owner: &UserId) -> LokrResult<()> {
        self.load_owned(file_id, owner, "unpublish").await?;
        if !self
            .metadata
            .set_share_token(file_id, None, Visibility::Private)
            .await?
        {
            return Err(LokrError::not_found(format!("file {}", file_id)));
        }
        info!("Unpublished file {}", file_id);
        Ok(())
    }

    /// Grant or update `grantee`'s permission on a file
    pub async fn share_with_user(
        &self,
        file_id: FileId,
        grantee: &UserId,
        permission: Permission,
        expires_at: Option<DateTime<Utc>>,
        owner: &UserId,
    ) -> LokrResult<FileShare> {
        let file = self.load_owned(file_id, owner, "share").await?;

        if grantee == owner {
            return Err(LokrError::validation("grantee", "cannot share a file with its owner"));
        }
        if matches!(expires_at, Some(expiry) if expiry <= Utc::now()) {
            return Err(LokrError::validation("expires_at", "expiry must be in the future"));
        }
        if self.metadata.get_user(grantee).await?.is_none() {
            return Err(LokrError::not_found(format!("user {}", grantee)));
        }

        let share = FileShare::new(file_id, grantee.clone(), permission, expires_at);
        self.metadata.upsert_share(&share).await?;
        if file.visibility == Visibility::Private {
            self.metadata.set_visibility(file_id, Visibility::Shared).await?;
        }
        debug!("Shared {} with {} ({})", file_id, grantee, permission);
        Ok(share)
    }

    /// Remove `grantee`'s share on a file
    pub async fn revoke_share(&self, file_id: FileId, grantee: &UserId, owner: &UserId) -> LokrResult<()> {
        let file = self.load_owned(file_id, owner, "unshare").await?;

        if !self.metadata.delete_share(file_id, grantee).await? {
            return Err(LokrError::not_found(format!(
                "share of file {} with {}",
                file_id, grantee
            )));
        }
        if file.visibility == Visibility::Shared && self.metadata.list_shares(file_id).await?.is_empty() {
            self.metadata.set_visibility(file_id, Visibility::Private).await?;
        }
        debug!("Revoked share of {} with {}", file_id, grantee);
        Ok(())
    }

    pub async fn list_shares(&self, file_id: FileId, owner: &UserId) -> LokrResult<Vec<FileShare>> {
        self.load_owned(file_id, owner, "list shares of").await?;
        Ok(self.metadata.list_shares(file_id).await?)
    }
}
