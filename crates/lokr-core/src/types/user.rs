//! User quota records.

use serde::{Deserialize, Serialize};

use super::UserId;

/// Per-user storage accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Sum of the sizes of the user's logical files
    pub storage_used: u64,
    pub storage_quota: u64,
}

impl User {
    pub fn new(id: UserId, storage_quota: u64) -> Self {
        Self {
            id,
            storage_used: 0,
            storage_quota,
        }
    }

    /// Bytes still available before the quota is hit
    pub fn available(&self) -> u64 {
        self.storage_quota.saturating_sub(self.storage_used)
    }

    /// `used + delta <= quota`; releasing space is always permitted
    pub fn can_charge(&self, delta: i64) -> bool {
        if delta <= 0 {
            return true;
        }
        self.storage_used
            .checked_add(delta as u64)
            .map(|total| total <= self.storage_quota)
            .unwrap_or(false)
    }
}
