//! `lokr sweep` and `lokr reconcile`.

use lokr_core::error::{LokrError, LokrResult};
use tracing::warn;

use super::{open_vault, CommandContext};

pub async fn sweep(ctx: &CommandContext) -> LokrResult<()> {
    let vault = ctx.open_vault().await?;
    let report = vault.sweep().await?;

    if report.examined == 0 {
        ctx.output.info("No orphaned blobs");
        return Ok(());
    }
    ctx.output.success(&format!(
        "Removed {} of {} orphaned blobs, freed {}",
        report.removed,
        report.examined,
        report.format_freed_space()
    ));
    if report.revived > 0 {
        ctx.output
            .info(&format!("{} were re-referenced and kept", report.revived));
    }
    if report.failed > 0 {
        ctx.output
            .warn(&format!("{} could not be removed and stay pending", report.failed));
    }
    Ok(())
}

/// Run a reconciliation pass; a report with unrepairable findings fails the command
pub async fn reconcile(verify: bool, json: bool, ctx: &CommandContext) -> LokrResult<()> {
    let mut loaded = ctx.load_config().await?;
    if verify {
        loaded.config.maintenance.verify_blobs = true;
    }
    let vault = open_vault(&loaded.config).await?;
    let report = vault.reconcile().await?;

    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| LokrError::storage("Failed to render reconcile report", e))?;
        ctx.output.line(&rendered);
    } else {
        ctx.output.line(&format!("blobs checked:    {}", report.blobs_checked));
        ctx.output.line(&format!("blobs corrected:  {}", report.blobs_corrected));
        ctx.output.line(&format!("users corrected:  {}", report.users_corrected));
        ctx.output.line(&format!("expired shares:   {}", report.expired_shares));
        ctx.output.line(&format!("claims released:  {}", report.claims_released));
        ctx.output.line(&format!(
            "orphans removed:  {} ({})",
            report.sweep.removed,
            report.sweep.format_freed_space()
        ));
        for fingerprint in &report.missing_blob_rows {
            ctx.output.warn(&format!("files reference {} but no blob row exists", fingerprint));
        }
        for fingerprint in &report.missing_bytes {
            ctx.output.warn(&format!("bytes of {} are missing from the backend", fingerprint));
        }
    }

    if report.is_clean() {
        return Ok(());
    }
    let problems = report.missing_blob_rows.len() + report.missing_bytes.len();
    warn!("Reconcile found {} unrepairable blobs", problems);
    Err(LokrError::ConsistencyFailure {
        message: format!("{} blobs need manual repair", problems),
    })
}
