//! # lokr-cli
//!
//! Command-line front end for the Lokr file vault.
//!
//! Parses commands, sets up logging and the panic hook, loads configuration
//! and dispatches to the command handlers.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::{FileId, Permission, UserId};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::CommandContext;
use output::errors::ErrorFormatter;

/// Deduplicating file vault with quotas and sharing
#[derive(Parser)]
#[command(name = "lokr", version, about = "Deduplicating file vault")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// User to act as
    #[arg(long = "as", global = true, env = "LOKR_USER", value_name = "USER")]
    pub user: Option<UserId>,

    /// Override [storage] root
    #[arg(long, global = true, value_name = "DIR")]
    pub storage_root: Option<Utf8PathBuf>,

    /// Override [metadata] url
    #[arg(long, global = true, value_name = "URL")]
    pub metadata_url: Option<String>,

    /// Override [sharing] public_base_url
    #[arg(long, global = true, value_name = "URL")]
    pub public_base_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a lokr.toml and create the vault directories
    Init {
        /// Overwrite an existing lokr.toml
        #[arg(long)]
        force: bool,
    },
    /// Manage users and quotas
    User {
        #[command(subcommand)]
        action: UserCommand,
    },
    /// Upload a file
    Upload {
        path: Utf8PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        /// Content type (guessed when omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Backend deadline for this upload
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// List your files
    Ls {
        #[arg(long)]
        json: bool,
    },
    /// Download a file by id
    Get {
        id: FileId,
        /// Destination path, or '-' for stdout
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },
    /// Download a file through a public share token
    Fetch {
        token: String,
        /// Destination path, or '-' for stdout
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },
    /// Delete a file
    Rm { id: FileId },
    /// Manage public links and per-user shares
    Share {
        #[command(subcommand)]
        action: ShareCommand,
    },
    /// Remove unreferenced blobs left by failed cleanups
    Sweep,
    /// Recompute reference counts and usage, then sweep
    Reconcile {
        /// Check that every live blob's bytes exist
        #[arg(long)]
        verify: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum UserCommand {
    /// Register a user
    Add {
        id: UserId,
        /// Quota in bytes (defaults to [quota] default_bytes)
        #[arg(long)]
        quota: Option<u64>,
    },
    /// Show usage and quota
    Show { id: Option<UserId> },
    /// Change a user's quota
    Quota { id: UserId, bytes: u64 },
}

#[derive(Subcommand)]
pub enum ShareCommand {
    /// Publish a file under a public link
    Public { id: FileId },
    /// Revoke a file's public link
    Unpublish { id: FileId },
    /// Grant a user one permission on a file
    Grant {
        id: FileId,
        grantee: UserId,
        /// view, download, edit or delete
        #[arg(long, default_value = "view")]
        permission: Permission,
        /// Expire the share after this many seconds
        #[arg(long, value_name = "SECS")]
        expires_in: Option<u64>,
    },
    /// Revoke a user's share
    Revoke { id: FileId, grantee: UserId },
    /// List a file's shares
    List { id: FileId },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_json);
    setup_panic_handler();

    info!("Starting Lokr CLI v{}", env!("CARGO_PKG_VERSION"));

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprint!("{}", ErrorFormatter::new().format_error(&e));
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> LokrResult<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| LokrError::io("Failed to create async runtime".to_string(), e))?;

    rt.block_on(async {
        let mut ctx = CommandContext::new()?;
        ctx.user = cli.user;
        if let Some(root) = cli.storage_root {
            ctx.overrides.insert("storage.root".to_string(), root.to_string());
        }
        if let Some(url) = cli.metadata_url {
            ctx.overrides.insert("metadata.url".to_string(), url);
        }
        if let Some(url) = cli.public_base_url {
            ctx.overrides.insert("sharing.public_base_url".to_string(), url);
        }
        commands::dispatch_command(cli.command, &ctx).await
    })
}

/// `LOKR_LOG` wins over `--verbose`; logs go to stderr so stdout stays pipeable
fn setup_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = std::env::var("LOKR_LOG")
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| {
            EnvFilter::new(format!(
                "lokr={level},lokr_core={level},lokr_store={level},lokr_vault={level},lokr_config={level}"
            ))
        });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("Lokr encountered an unexpected error: {}", panic_info);
        eprintln!("Lokr crashed! This is a bug.");
        eprintln!("Please report this at: https://github.com/lokr-vault/lokr/issues");
        eprintln!("Error: {}", panic_info);
    }));
}
