//! Logical file records.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{FileId, UserId};
use crate::error::LokrError;
use crate::utils::hash::Fingerprint;

/// Who may see a logical file without an explicit share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Private,
    Public,
    Shared,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "PRIVATE",
            Visibility::Public => "PUBLIC",
            Visibility::Shared => "SHARED",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = LokrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIVATE" => Ok(Visibility::Private),
            "PUBLIC" => Ok(Visibility::Public),
            "SHARED" => Ok(Visibility::Shared),
            other => Err(LokrError::validation("visibility", format!("unknown visibility '{}'", other))),
        }
    }
}

/// A user-visible file record pointing at exactly one content blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalFile {
    pub id: FileId,
    pub owner_id: UserId,
    pub fingerprint: Fingerprint,
    pub display_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub visibility: Visibility,
    /// Public share token, globally unique when present
    pub share_token: Option<String>,
    pub download_count: u64,
    /// When the file was uploaded (as timestamp)
    pub created_at: i64,
}

impl LogicalFile {
    /// Create a new private file record
    pub fn new(
        owner_id: UserId,
        fingerprint: Fingerprint,
        display_name: String,
        mime_type: String,
        byte_size: u64,
    ) -> Self {
        Self {
            id: FileId::new(),
            owner_id,
            fingerprint,
            display_name,
            mime_type,
            byte_size,
            visibility: Visibility::Private,
            share_token: None,
            download_count: 0,
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner_id == user
    }
}
