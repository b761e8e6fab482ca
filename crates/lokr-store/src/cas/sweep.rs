//! Orphan sweep
//!
//! Releases that could not finish their cleanup leave rows with a zero
//! reference count. The sweep retries the removal for a bounded batch.

use lokr_core::types::ContentBlob;
use serde::Serialize;
use tracing::{debug, info};

use super::store::{ContentStore, Removal};
use crate::StoreResult;

/// Result of an orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orphans looked at
    pub examined: usize,
    /// Orphans whose bytes and row were removed
    pub removed: usize,
    /// Bytes freed by removed orphans
    pub freed_bytes: u64,
    /// Orphans whose removal failed and stays pending
    pub failed: usize,
    /// Orphans re-referenced by a concurrent put before removal
    pub revived: usize,
}

impl SweepReport {
    /// Format freed space in human-readable format
    pub fn format_freed_space(&self) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = self.freed_bytes as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", self.freed_bytes, UNITS[unit_index])
        } else {
            format!("{:.1} {}", size, UNITS[unit_index])
        }
    }

    pub fn merge(&mut self, other: &SweepReport) {
        self.examined += other.examined;
        self.removed += other.removed;
        self.freed_bytes += other.freed_bytes;
        self.failed += other.failed;
        self.revived += other.revived;
    }
}

impl ContentStore {
    /// Blobs with no references, oldest first
    pub async fn get_orphaned(&self, limit: usize) -> StoreResult<Vec<ContentBlob>> {
        Ok(self.metadata().list_orphaned_blobs(limit).await?)
    }

    /// Remove up to `limit` orphans. Individual failures are counted, not returned.
    pub async fn cleanup_orphaned(&self, limit: usize) -> StoreResult<SweepReport> {
        let orphans = self.get_orphaned(limit).await?;
        let mut report = SweepReport {
            examined: orphans.len(),
            ..SweepReport::default()
        };

        for blob in orphans {
            match self.remove_orphan(&blob.fingerprint, &blob.storage_key).await {
                Removal::Removed => {
                    report.removed += 1;
                    report.freed_bytes += blob.byte_size;
                }
                Removal::Gone => debug!("Orphan {} already removed", blob.storage_key),
                Removal::Deferred => report.failed += 1,
                Removal::Revived(_) => report.revived += 1,
            }
        }

        if report.examined > 0 {
            info!(
                "Orphan sweep removed {} of {} blobs ({} freed, {} pending)",
                report.removed,
                report.examined,
                report.format_freed_space(),
                report.failed
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_formatting() {
        let report = SweepReport {
            freed_bytes: 1536,
            ..SweepReport::default()
        };
        assert_eq!(report.format_freed_space(), "1.5 KB");

        let small = SweepReport {
            freed_bytes: 10,
            ..SweepReport::default()
        };
        assert_eq!(small.format_freed_space(), "10 B");

        let large = SweepReport {
            freed_bytes: 1024 * 1024 * 1024 + 512 * 1024 * 1024,
            ..SweepReport::default()
        };
        assert_eq!(large.format_freed_space(), "1.5 GB");
    }

    #[test]
    fn test_merge_accumulates() {
        let mut total = SweepReport::default();
        total.merge(&SweepReport {
            examined: 2,
            removed: 1,
            freed_bytes: 10,
            failed: 1,
            revived: 0,
        });
        total.merge(&SweepReport {
            examined: 1,
            removed: 1,
            freed_bytes: 5,
            failed: 0,
            revived: 0,
        });
        assert_eq!(total.examined, 3);
        assert_eq!(total.removed, 2);
        assert_eq!(total.freed_bytes, 15);
    }
}
