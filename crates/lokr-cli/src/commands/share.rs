//! `lokr share` commands.

use chrono::{Duration, Utc};
use lokr_core::error::{LokrError, LokrResult};

use super::CommandContext;
use crate::ShareCommand;

pub async fn execute(action: ShareCommand, ctx: &CommandContext) -> LokrResult<()> {
    let owner = ctx.requester()?;
    let vault = ctx.open_vault().await?;

    match action {
        ShareCommand::Public { id } => {
            let share = vault.create_public_share(id, owner).await?;
            ctx.output.success(&format!("File {} is public", id));
            ctx.output.line(share.url.as_str());
        }
        ShareCommand::Unpublish { id } => {
            vault.revoke_public_share(id, owner).await?;
            ctx.output.success(&format!("Public link of {} revoked", id));
        }
        ShareCommand::Grant {
            id,
            grantee,
            permission,
            expires_in,
        } => {
            let expires_at = match expires_in {
                Some(secs) => {
                    let secs = i64::try_from(secs)
                        .ok()
                        .and_then(Duration::try_seconds)
                        .ok_or_else(|| LokrError::validation("expires_in", "expiry is too far in the future"))?;
                    Some(Utc::now() + secs)
                }
                None => None,
            };
            let share = vault
                .share_with_user(id, &grantee, permission, expires_at, owner)
                .await?;
            let until = share
                .expires_at
                .map(|at| format!(" until {}", at.to_rfc3339()))
                .unwrap_or_default();
            ctx.output.success(&format!(
                "Granted {} on {} to {}{}",
                share.permission, id, grantee, until
            ));
        }
        ShareCommand::Revoke { id, grantee } => {
            vault.revoke_share(id, &grantee, owner).await?;
            ctx.output.success(&format!("Revoked {}'s share of {}", grantee, id));
        }
        ShareCommand::List { id } => {
            let shares = vault.list_shares(id, owner).await?;
            if shares.is_empty() {
                ctx.output.info("No shares");
            }
            let now = Utc::now();
            for share in shares {
                let state = match share.expires_at {
                    Some(at) if at <= now => "expired".to_string(),
                    Some(at) => format!("expires {}", at.to_rfc3339()),
                    None => "no expiry".to_string(),
                };
                ctx.output.line(&format!(
                    "{:<24}  {:<8}  {}",
                    share.grantee_id.as_str(),
                    share.permission.as_str(),
                    state
                ));
            }
        }
    }
    Ok(())
}
