//! Reconciliation
//!
//! Recomputes derived counters from the logical file rows and repairs any
//! drift left by failed compensations. Meant to run while the vault is
//! quiescent; concurrent uploads can make a recomputed count stale again.

use chrono::Utc;
use lokr_core::error::LokrResult;
use lokr_core::utils::hash::Fingerprint;
use lokr_core::types::UserId;
use lokr_store::{ContentStore, SweepReport};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// What a reconciliation pass found and fixed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Blob rows examined
    pub blobs_checked: usize,
    /// Blob rows whose reference count was rewritten
    pub blobs_corrected: usize,
    /// Fingerprints referenced by logical files but without a blob row
    pub missing_blob_rows: Vec<String>,
    /// Live blobs whose bytes are absent from the backend
    pub missing_bytes: Vec<String>,
    /// Users whose `storage_used` was rewritten
    pub users_corrected: usize,
    /// Expired shares purged
    pub expired_shares: u64,
    /// Removal claims left behind by interrupted orphan removals
    pub claims_released: u64,
    /// Orphan sweep run at the end of the pass
    pub sweep: SweepReport,
}

impl ReconcileReport {
    /// No inconsistencies that reconciliation cannot repair itself
    pub fn is_clean(&self) -> bool {
        self.missing_blob_rows.is_empty() && self.missing_bytes.is_empty()
    }
}

pub(crate) struct Reconciler<'a> {
    pub content: &'a ContentStore,
    pub orphan_batch: usize,
    pub verify_blobs: bool,
}

impl Reconciler<'_> {
    pub async fn run(&self) -> LokrResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        report.claims_released = self.content.metadata().reset_orphan_claims().await?;
        if report.claims_released > 0 {
            warn!("Released {} stale orphan removal claims", report.claims_released);
        }
        self.reconcile_blobs(&mut report).await?;
        self.reconcile_usage(&mut report).await?;

        report.expired_shares = self.content.metadata().delete_expired_shares(Utc::now()).await?;
        report.sweep = self.sweep().await?;

        info!(
            "Reconciled {} blobs ({} corrected), {} users corrected, {} expired shares purged",
            report.blobs_checked, report.blobs_corrected, report.users_corrected, report.expired_shares
        );
        Ok(report)
    }

    async fn reconcile_blobs(&self, report: &mut ReconcileReport) -> LokrResult<()> {
        let metadata = self.content.metadata();
        let mut live: HashMap<Fingerprint, u64> =
            metadata.live_reference_counts().await?.into_iter().collect();

        let blobs = metadata.list_blobs().await?;
        report.blobs_checked = blobs.len();

        for blob in blobs {
            let expected = live.remove(&blob.fingerprint).unwrap_or(0);
            if blob.reference_count != expected {
                warn!(
                    "Blob {} has reference count {} but {} live files, correcting",
                    blob.storage_key, blob.reference_count, expected
                );
                metadata.set_blob_ref(&blob.fingerprint, expected).await?;
                report.blobs_corrected += 1;
            }
            if self.verify_blobs && expected > 0 && !self.content.bytes_present(&blob.fingerprint).await? {
                error!("Blob {} is referenced but its bytes are missing", blob.storage_key);
                report.missing_bytes.push(blob.fingerprint.to_hex());
            }
        }

        // Whatever is left is referenced by files but has no row
        let mut missing: Vec<Fingerprint> = live.into_keys().collect();
        missing.sort();
        for fp in missing {
            error!("Logical files reference blob {} which has no row", fp);
            report.missing_blob_rows.push(fp.to_hex());
        }
        Ok(())
    }

    async fn reconcile_usage(&self, report: &mut ReconcileReport) -> LokrResult<()> {
        let metadata = self.content.metadata();
        let usage: HashMap<UserId, u64> = metadata.usage_by_owner().await?.into_iter().collect();

        for user in metadata.list_users().await? {
            let expected = usage.get(&user.id).copied().unwrap_or(0);
            if user.storage_used != expected {
                warn!(
                    "User {} has storage_used {} but owns {} bytes, correcting",
                    user.id, user.storage_used, expected
                );
                metadata.set_storage_used(&user.id, expected).await?;
                report.users_corrected += 1;
            }
        }
        Ok(())
    }

    /// Sweep orphans in batches until a batch makes no progress
    async fn sweep(&self) -> LokrResult<SweepReport> {
        let mut total = SweepReport::default();
        loop {
            let batch = self.content.cleanup_orphaned(self.orphan_batch).await?;
            total.merge(&batch);
            if batch.examined < self.orphan_batch || batch.removed == 0 {
                break;
            }
        }
        Ok(total)
    }
}
