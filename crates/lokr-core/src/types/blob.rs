//! Content blob records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::hash::Fingerprint;

/// The single physical copy of bytes for one fingerprint.
///
/// Owned collectively by every logical file that names the fingerprint;
/// `reference_count` tracks how many of them are live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlob {
    /// Content fingerprint (primary key)
    pub fingerprint: Fingerprint,
    /// Key of the bytes in the blob backend
    pub storage_key: String,
    /// Size in bytes
    pub byte_size: u64,
    /// Number of live logical files referencing this blob
    pub reference_count: u64,
    /// When the row was first inserted (as timestamp)
    pub created_at: i64,
}

impl ContentBlob {
    /// Create a blob record for a first upload (one reference)
    pub fn new(fingerprint: Fingerprint, byte_size: u64) -> Self {
        Self {
            storage_key: fingerprint.storage_key(),
            fingerprint,
            byte_size,
            reference_count: 1,
            created_at: Utc::now().timestamp(),
        }
    }

    /// A blob with no remaining references, pending physical cleanup
    pub fn is_orphaned(&self) -> bool {
        self.reference_count == 0
    }

    /// Get created_at as DateTime
    pub fn created_at_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_at, 0).unwrap_or_else(Utc::now)
    }
}

/// Location and size of a blob after a content store `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub fingerprint: Fingerprint,
    pub storage_key: String,
    pub byte_size: u64,
    /// Reference count observed right after this put
    pub reference_count: u64,
    /// Whether this put wrote the physical bytes
    pub created: bool,
}
