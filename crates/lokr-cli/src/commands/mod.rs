//! Command implementations and dispatch logic.
//!
//! Each command is an async function taking the shared [`CommandContext`].
//! Commands that touch the vault open it through the context, which wires
//! configuration into the backend, metadata store and content store.

use camino::{Utf8Path, Utf8PathBuf};
use lokr_config::{BackendKind, ConfigLoader, LoadedConfig, LokrToml, ProviderKind};
use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::UserId;
use lokr_store::{open_backend, BackendSettings, ContentStore, ObjectProvider, SqliteMetadataStore};
use lokr_vault::{Vault, VaultSettings};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub mod files;
pub mod init;
pub mod maintenance;
pub mod share;
pub mod user;

#[cfg(test)]
mod tests;

use crate::{output::OutputHandler, Commands};

/// Shared context for all commands
pub struct CommandContext {
    pub cwd: Utf8PathBuf,
    pub output: OutputHandler,
    /// User the command acts as
    pub user: Option<UserId>,
    /// Dotted-key configuration overrides from flags
    pub overrides: HashMap<String, String>,
}

impl CommandContext {
    pub fn new() -> LokrResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| LokrError::io("Failed to get current directory".to_string(), e))?;
        let cwd = Utf8PathBuf::try_from(cwd).map_err(|e| LokrError::ConfigValidation {
            field: "cwd".to_string(),
            reason: format!("working directory is not valid UTF-8: {}", e),
        })?;
        Ok(Self::in_dir(cwd))
    }

    pub fn in_dir(cwd: Utf8PathBuf) -> Self {
        Self {
            cwd,
            output: OutputHandler::new(),
            user: None,
            overrides: HashMap::new(),
        }
    }

    /// The acting user, required by most commands
    pub fn requester(&self) -> LokrResult<&UserId> {
        self.user
            .as_ref()
            .ok_or_else(|| LokrError::validation("user", "pass --as <USER> or set LOKR_USER"))
    }

    pub async fn load_config(&self) -> LokrResult<LoadedConfig> {
        ConfigLoader::new(self.cwd.clone()).load(self.overrides.clone()).await
    }

    /// Open the vault described by the layered configuration
    pub async fn open_vault(&self) -> LokrResult<Vault> {
        let loaded = self.load_config().await?;
        open_vault(&loaded.config).await
    }
}

/// Map `[storage]` onto a backend selection
pub fn backend_settings(config: &LokrToml) -> LokrResult<BackendSettings> {
    let storage = &config.storage;
    match storage.backend {
        BackendKind::Local => Ok(BackendSettings::Local {
            root: storage.root.clone(),
        }),
        BackendKind::Object => {
            let object = storage.object.as_ref().ok_or_else(|| LokrError::ConfigValidation {
                field: "storage.object".to_string(),
                reason: "object backend needs a [storage.object] section".to_string(),
            })?;
            let provider = match object.provider {
                ProviderKind::Memory => ObjectProvider::Memory,
                ProviderKind::S3 => ObjectProvider::S3 {
                    bucket: object.bucket.clone().unwrap_or_default(),
                    region: object.region.clone(),
                    endpoint: object.endpoint.clone(),
                    allow_http: object.allow_http,
                },
            };
            Ok(BackendSettings::ObjectStore {
                provider,
                prefix: object.prefix.clone(),
            })
        }
    }
}

pub fn vault_settings(config: &LokrToml) -> VaultSettings {
    VaultSettings {
        default_quota_bytes: config.quota.default_bytes,
        public_base_url: config.sharing.public_base_url.clone(),
        orphan_batch: config.maintenance.orphan_batch,
        verify_blobs: config.maintenance.verify_blobs,
    }
}

/// File path of a `sqlite://` URL, if it names one
pub fn sqlite_file(url: &str) -> Option<&Utf8Path> {
    let path = url.strip_prefix("sqlite://")?.split('?').next()?;
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Some(Utf8Path::new(path))
}

pub async fn open_vault(config: &LokrToml) -> LokrResult<Vault> {
    let backend = open_backend(&backend_settings(config)?)?;

    if let Some(parent) = sqlite_file(&config.metadata.url).and_then(Utf8Path::parent) {
        if !parent.as_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LokrError::io(format!("Failed to create {}", parent), e))?;
        }
    }
    let metadata = SqliteMetadataStore::open(&config.metadata.url, config.metadata.max_connections).await?;
    debug!("Opened {} backend and metadata at {}", backend.name(), config.metadata.url);

    let content = ContentStore::new(backend, Arc::new(metadata))
        .with_default_deadline(config.storage.timeout());
    Vault::new(Arc::new(content), vault_settings(config))
}

/// Dispatch a command to its handler
pub async fn dispatch_command(command: Commands, ctx: &CommandContext) -> LokrResult<()> {
    match command {
        Commands::Init { force } => {
            info!("Initializing vault in {}", ctx.cwd);
            init::execute(force, ctx).await
        }
        Commands::User { action } => user::execute(action, ctx).await,
        Commands::Upload {
            path,
            name,
            mime,
            timeout_ms,
        } => {
            info!("Uploading {}", path);
            files::upload(path, name, mime, timeout_ms, ctx).await
        }
        Commands::Ls { json } => files::list(json, ctx).await,
        Commands::Get { id, output } => files::get(id, output, ctx).await,
        Commands::Fetch { token, output } => files::fetch(token, output, ctx).await,
        Commands::Rm { id } => {
            info!("Deleting {}", id);
            files::remove(id, ctx).await
        }
        Commands::Share { action } => share::execute(action, ctx).await,
        Commands::Sweep => maintenance::sweep(ctx).await,
        Commands::Reconcile { verify, json } => maintenance::reconcile(verify, json, ctx).await,
        Commands::Version => show_version(ctx).await,
    }
}

async fn show_version(ctx: &CommandContext) -> LokrResult<()> {
    let version = env!("CARGO_PKG_VERSION");
    ctx.output.line(&format!("lokr {}", version));
    ctx.output.line(&format!("built:  {}", env!("BUILD_DATE")));
    ctx.output.line(&format!("target: {}", env!("BUILD_TARGET")));
    ctx.output.line(&format!("rustc:  {}", env!("RUSTC_VERSION")));

    Ok(())
}
