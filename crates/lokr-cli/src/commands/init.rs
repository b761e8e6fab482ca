//! `lokr init` command implementation.
//!
//! Writes a default lokr.toml in the current directory, creates the blob
//! directory and the metadata database.

use lokr_config::toml::serialize_lokr_toml;
use lokr_config::{LokrToml, CONFIG_FILE};
use lokr_core::error::{LokrError, LokrResult};
use lokr_store::MetadataStore;
use std::fs;

use super::{open_vault, CommandContext};

const HEADER: &str = "# Lokr vault configuration\n\
# Override any value with LOKR_* environment variables or command-line flags.\n\n";

/// Execute the `lokr init` command
pub async fn execute(force: bool, ctx: &CommandContext) -> LokrResult<()> {
    let config_path = ctx.cwd.join(CONFIG_FILE);

    if config_path.exists() && !force {
        ctx.output.info("lokr.toml already exists, skipping initialization");
        return Ok(());
    }

    ctx.output.step("*", &format!("Initializing Lokr vault in {}", ctx.cwd));

    let content = format!("{}{}", HEADER, serialize_lokr_toml(&LokrToml::default())?);
    fs::write(&config_path, content)
        .map_err(|e| LokrError::io(format!("Failed to create {}", config_path), e))?;
    ctx.output.success("Created lokr.toml");

    let state_dir = ctx.cwd.join(".lokr");
    fs::create_dir_all(&state_dir)
        .map_err(|e| LokrError::io(format!("Failed to create {}", state_dir), e))?;
    let ignore = state_dir.join(".gitignore");
    if !ignore.exists() {
        fs::write(&ignore, "*\n").map_err(|e| LokrError::io(format!("Failed to create {}", ignore), e))?;
    }

    // Opening the vault creates the blob directory and migrates the database
    let loaded = ctx.load_config().await?;
    let vault = open_vault(&loaded.config).await?;
    vault.content().metadata().health_check().await?;
    ctx.output.success(&format!("Blob storage at {}", loaded.config.storage.root));
    ctx.output.success(&format!("Metadata at {}", loaded.config.metadata.url));

    ctx.output.info("");
    ctx.output.info("Next steps:");
    ctx.output.info("  lokr user add <USER>");
    ctx.output.info("  lokr --as <USER> upload <FILE>");

    Ok(())
}
