//! Configuration for the Lokr vault
//!
//! Parses and validates `lokr.toml` and layers it with the global config,
//! `LOKR_*` environment variables and command-line overrides.

pub mod merge;
pub mod toml;

// Re-export main types
pub use self::merge::{ConfigLayering, ConfigLoader, ConfigSource, LoadedConfig};
pub use self::toml::{
    BackendKind, LokrToml, MaintenanceSection, MetadataSection, ObjectSection, ProviderKind,
    QuotaSection, SharingSection, StorageSection, CONFIG_FILE,
};

use lokr_core::error::LokrError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, LokrError>;
