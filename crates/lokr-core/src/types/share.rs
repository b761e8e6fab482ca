//! Per-user file shares.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{FileId, UserId};
use crate::error::LokrError;

/// Action a grantee may perform on a shared file.
///
/// Permissions are not hierarchical: `View` does not imply `Download`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    View,
    Download,
    Edit,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "VIEW",
            Permission::Download => "DOWNLOAD",
            Permission::Edit => "EDIT",
            Permission::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = LokrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VIEW" => Ok(Permission::View),
            "DOWNLOAD" => Ok(Permission::Download),
            "EDIT" => Ok(Permission::Edit),
            "DELETE" => Ok(Permission::Delete),
            other => Err(LokrError::validation("permission", format!("unknown permission '{}'", other))),
        }
    }
}

/// A grant of one permission on one file to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub file_id: FileId,
    pub grantee_id: UserId,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileShare {
    pub fn new(
        file_id: FileId,
        grantee_id: UserId,
        permission: Permission,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            file_id,
            grantee_id,
            permission,
            expires_at,
        }
    }

    /// Whether the share has lapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Whether this share grants exactly `action` at `now`
    pub fn grants(&self, action: Permission, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.permission == action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn share(permission: Permission, expires_at: Option<DateTime<Utc>>) -> FileShare {
        FileShare::new(FileId::new(), UserId::new("bob"), permission, expires_at)
    }

    #[test]
    fn test_permissions_are_not_hierarchical() {
        let now = Utc::now();
        let view = share(Permission::View, None);
        assert!(view.grants(Permission::View, now));
        assert!(!view.grants(Permission::Download, now));

        let delete = share(Permission::Delete, None);
        assert!(!delete.grants(Permission::View, now));
    }

    #[test]
    fn test_expired_share_grants_nothing() {
        let now = Utc::now();
        let expired = share(Permission::Download, Some(now - Duration::minutes(1)));
        assert!(expired.is_expired_at(now));
        assert!(!expired.grants(Permission::Download, now));

        let live = share(Permission::Download, Some(now + Duration::minutes(1)));
        assert!(live.grants(Permission::Download, now));
    }

    #[test]
    fn test_permission_parse() {
        assert_eq!("download".parse::<Permission>().unwrap(), Permission::Download);
        assert!("admin".parse::<Permission>().is_err());
    }
}
