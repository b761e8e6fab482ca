//! lokr.toml parsing, validation and serialization

use camino::{Utf8Path, Utf8PathBuf};
use lokr_core::error::LokrError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::ConfigResult;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "lokr.toml";

/// Complete lokr.toml configuration. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LokrToml {
    pub storage: StorageSection,
    pub metadata: MetadataSection,
    pub quota: QuotaSection,
    pub sharing: SharingSection,
    pub maintenance: MaintenanceSection,
}

/// Which blob backend variant to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Object,
}

impl std::str::FromStr for BackendKind {
    type Err = LokrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "object" => Ok(BackendKind::Object),
            other => Err(LokrError::ConfigValidation {
                field: "storage.backend".to_string(),
                reason: format!("unknown backend '{}' (expected 'local' or 'object')", other),
            }),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub backend: BackendKind,
    /// Blob directory for the local backend
    pub root: Utf8PathBuf,
    /// Deadline for each blob backend call
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectSection>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            root: Utf8PathBuf::from(".lokr/blobs"),
            timeout_ms: 30_000,
            object: None,
        }
    }
}

impl StorageSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Object store provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    S3,
    Memory,
}

/// `[storage.object]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectSection {
    pub provider: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub allow_http: bool,
    /// Key prefix inside the bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// `[metadata]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataSection {
    /// SQLite connection URL
    pub url: String,
    pub max_connections: u32,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            url: "sqlite://.lokr/metadata.db".to_string(),
            max_connections: 5,
        }
    }
}

/// `[quota]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaSection {
    /// Quota for users registered without an explicit one
    pub default_bytes: u64,
}

impl Default for QuotaSection {
    fn default() -> Self {
        Self {
            default_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// `[sharing]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SharingSection {
    pub public_base_url: String,
}

impl Default for SharingSection {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080/s".to_string(),
        }
    }
}

/// `[maintenance]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceSection {
    /// Orphans removed per sweep batch
    pub orphan_batch: usize,
    /// Check that every live blob's bytes exist during reconcile
    pub verify_blobs: bool,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            orphan_batch: 100,
            verify_blobs: false,
        }
    }
}

impl LokrToml {
    /// Anchor relative paths at `base` (the directory holding lokr.toml)
    pub fn resolve_paths(&mut self, base: &Utf8Path) {
        if self.storage.root.is_relative() {
            self.storage.root = base.join(&self.storage.root);
        }
        if let Some(path) = self.metadata.url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or_default();
            if !path.is_empty() && !path.starts_with(':') && Utf8Path::new(path).is_relative() {
                let options = self.metadata.url.split_once('?').map(|(_, o)| o.to_string());
                let joined = base.join(path);
                self.metadata.url = match options {
                    Some(options) => format!("sqlite://{}?{}", joined, options),
                    None => format!("sqlite://{}", joined),
                };
            }
        }
    }
}

/// Parse a TOML document into a raw table, for layering
pub fn parse_table(content: &str) -> ConfigResult<toml::Table> {
    content
        .parse::<toml::Table>()
        .map_err(|e| LokrError::ConfigParse {
            message: format!("TOML syntax error: {}", e),
        })
}

/// Turn a (possibly merged) table into a validated configuration
pub fn from_table(table: toml::Table) -> ConfigResult<LokrToml> {
    let config: LokrToml = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| LokrError::ConfigParse {
            message: e.to_string(),
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a lokr.toml string
pub fn parse_lokr_toml(content: &str) -> ConfigResult<LokrToml> {
    from_table(parse_table(content)?)
}

/// Serialize to a lokr.toml string
pub fn serialize_lokr_toml(config: &LokrToml) -> ConfigResult<String> {
    toml::to_string_pretty(config).map_err(|e| LokrError::ConfigParse {
        message: format!("TOML serialization error: {}", e),
    })
}

fn invalid(field: &str, reason: impl Into<String>) -> LokrError {
    LokrError::ConfigValidation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Validate field values that serde cannot check
pub fn validate_config(config: &LokrToml) -> ConfigResult<()> {
    let storage = &config.storage;
    if storage.timeout_ms == 0 {
        return Err(invalid("storage.timeout_ms", "must be greater than zero"));
    }
    match storage.backend {
        BackendKind::Local => {
            if storage.root.as_str().trim().is_empty() {
                return Err(invalid("storage.root", "local backend needs a blob directory"));
            }
        }
        BackendKind::Object => {
            let object = storage
                .object
                .as_ref()
                .ok_or_else(|| invalid("storage.object", "object backend needs a [storage.object] section"))?;
            if object.provider == ProviderKind::S3
                && object.bucket.as_deref().map(str::trim).unwrap_or_default().is_empty()
            {
                return Err(invalid("storage.object.bucket", "S3 provider needs a bucket"));
            }
            if let Some(endpoint) = &object.endpoint {
                Url::parse(endpoint).map_err(|e| invalid("storage.object.endpoint", e.to_string()))?;
            }
        }
    }

    if !config.metadata.url.starts_with("sqlite:") {
        return Err(invalid("metadata.url", "only sqlite: URLs are supported"));
    }
    if config.metadata.max_connections == 0 {
        return Err(invalid("metadata.max_connections", "must be at least 1"));
    }

    let base = Url::parse(&config.sharing.public_base_url)
        .map_err(|e| invalid("sharing.public_base_url", e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid("sharing.public_base_url", "must be an http or https URL"));
    }

    if config.maintenance.orphan_batch == 0 {
        return Err(invalid("maintenance.orphan_batch", "must be at least 1"));
    }
    Ok(())
}

/// Load and parse a lokr.toml file
pub async fn load_from_file(path: &Utf8Path) -> ConfigResult<LokrToml> {
    let content = read_file(path).await?;
    parse_lokr_toml(&content).map_err(|e| in_file(path, e))
}

/// Load a lokr.toml file as a raw table
pub async fn load_table(path: &Utf8Path) -> ConfigResult<toml::Table> {
    let content = read_file(path).await?;
    parse_table(&content).map_err(|e| in_file(path, e))
}

async fn read_file(path: &Utf8Path) -> ConfigResult<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LokrError::io(format!("Failed to read {}", path), e))
}

fn in_file(path: &Utf8Path, err: LokrError) -> LokrError {
    match err {
        LokrError::ConfigParse { message } => LokrError::ConfigParse {
            message: format!("In file {}: {}", path, message),
        },
        LokrError::ConfigValidation { field, reason } => LokrError::ConfigValidation {
            field,
            reason: format!("{} (in {})", reason, path),
        },
        other => other,
    }
}
