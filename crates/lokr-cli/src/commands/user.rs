//! `lokr user` commands.

use lokr_core::error::LokrResult;

use super::CommandContext;
use crate::output::format_bytes;
use crate::UserCommand;

pub async fn execute(action: UserCommand, ctx: &CommandContext) -> LokrResult<()> {
    let vault = ctx.open_vault().await?;
    match action {
        UserCommand::Add { id, quota } => {
            let user = vault.register_user(&id, quota).await?;
            ctx.output.success(&format!(
                "Registered {} with a quota of {}",
                user.id,
                format_bytes(user.storage_quota)
            ));
        }
        UserCommand::Show { id } => {
            let id = match id {
                Some(id) => id,
                None => ctx.requester()?.clone(),
            };
            let user = vault.quota().usage(&id).await?;
            ctx.output.line(&format!("user:      {}", user.id));
            ctx.output.line(&format!("used:      {}", format_bytes(user.storage_used)));
            ctx.output.line(&format!("quota:     {}", format_bytes(user.storage_quota)));
            ctx.output.line(&format!("available: {}", format_bytes(user.available())));
        }
        UserCommand::Quota { id, bytes } => {
            vault.quota().set_quota(&id, bytes).await?;
            ctx.output
                .success(&format!("Quota of {} set to {}", id, format_bytes(bytes)));
        }
    }
    Ok(())
}
