//! Configuration layering, lookup and environment overrides
//!
//! Layers from lowest to highest priority: built-in defaults, the global
//! `~/.lokr/config.toml`, the project `lokr.toml`, `LOKR_*` environment
//! variables, then command-line flags.

use camino::Utf8PathBuf;
use lokr_core::error::LokrError;
use std::collections::HashMap;
use tracing::debug;

use crate::toml::{from_table, load_table, BackendKind, LokrToml, CONFIG_FILE};
use crate::ConfigResult;

/// Environment variables understood as overrides
pub const ENV_STORAGE_BACKEND: &str = "LOKR_STORAGE_BACKEND";
pub const ENV_STORAGE_ROOT: &str = "LOKR_STORAGE_ROOT";
pub const ENV_BACKEND_TIMEOUT_MS: &str = "LOKR_BACKEND_TIMEOUT_MS";
pub const ENV_METADATA_URL: &str = "LOKR_METADATA_URL";
pub const ENV_DEFAULT_QUOTA: &str = "LOKR_DEFAULT_QUOTA";
pub const ENV_PUBLIC_BASE_URL: &str = "LOKR_PUBLIC_BASE_URL";

/// Locates and loads configuration files
pub struct ConfigLoader {
    /// Current working directory
    cwd: Utf8PathBuf,
}

/// Where a configuration layer came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Defaults,
    Global(Utf8PathBuf),
    Project(Utf8PathBuf),
    Environment(String),
    CommandLine,
}

/// A fully layered configuration
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: LokrToml,
    /// Directory relative paths were anchored at
    pub base_dir: Utf8PathBuf,
    pub sources: Vec<ConfigSource>,
}

impl ConfigLoader {
    pub fn new(cwd: Utf8PathBuf) -> Self {
        Self { cwd }
    }

    /// Find `filename` here or in a parent directory
    pub fn find_config_path(&self, filename: &str) -> Option<Utf8PathBuf> {
        let mut current = Some(self.cwd.as_path());
        while let Some(dir) = current {
            let candidate = dir.join(filename);
            if candidate.is_file() {
                return Some(candidate);
            }
            current = dir.parent();
        }
        None
    }

    /// The project lokr.toml as a raw table, if one exists
    pub async fn load_project_table(&self) -> ConfigResult<Option<(::toml::Table, Utf8PathBuf)>> {
        match self.find_config_path(CONFIG_FILE) {
            Some(path) => {
                let table = load_table(&path).await?;
                Ok(Some((table, path)))
            }
            None => Ok(None),
        }
    }

    /// Path of the global configuration file
    pub fn global_config_path() -> ConfigResult<Utf8PathBuf> {
        let home_dir = dirs::home_dir().ok_or_else(|| LokrError::ConfigValidation {
            field: "home_dir".to_string(),
            reason: "Could not determine home directory".to_string(),
        })?;
        let home = Utf8PathBuf::try_from(home_dir).map_err(|e| LokrError::ConfigValidation {
            field: "home_dir".to_string(),
            reason: format!("Invalid home directory path: {}", e),
        })?;
        Ok(home.join(".lokr").join("config.toml"))
    }

    /// The global configuration as a raw table, if one exists
    pub async fn load_global_table(&self) -> ConfigResult<Option<(::toml::Table, Utf8PathBuf)>> {
        let path = Self::global_config_path()?;
        if path.is_file() {
            Ok(Some((load_table(&path).await?, path)))
        } else {
            Ok(None)
        }
    }

    /// Load every layer and merge them.
    ///
    /// Relative paths are anchored at the directory of the project file, or
    /// at the working directory when there is none.
    pub async fn load(&self, cli_overrides: HashMap<String, String>) -> ConfigResult<LoadedConfig> {
        let mut sources = vec![ConfigSource::Defaults];

        let global = self.load_global_table().await?.map(|(table, path)| {
            sources.push(ConfigSource::Global(path));
            table
        });

        let mut base_dir = self.cwd.clone();
        let project = self.load_project_table().await?.map(|(table, path)| {
            if let Some(dir) = path.parent() {
                base_dir = dir.to_path_buf();
            }
            sources.push(ConfigSource::Project(path));
            table
        });

        let env = ConfigLayering::collect_env_overrides();
        let mut env_keys: Vec<&String> = env.keys().collect();
        env_keys.sort();
        sources.extend(env_keys.into_iter().map(|k| ConfigSource::Environment(k.clone())));
        if !cli_overrides.is_empty() {
            sources.push(ConfigSource::CommandLine);
        }

        let mut config = ConfigLayering::merge_configs(global, project, env, cli_overrides)?;
        config.resolve_paths(&base_dir);
        debug!("Loaded configuration from {:?}", sources);

        Ok(LoadedConfig {
            config,
            base_dir,
            sources,
        })
    }
}

/// Merges configuration layers
pub struct ConfigLayering;

impl ConfigLayering {
    /// Merge the file layers, then apply environment and CLI overrides.
    ///
    /// Tables merge key by key, so a project file that sets only
    /// `[storage] root` keeps every other global setting.
    pub fn merge_configs(
        global: Option<::toml::Table>,
        project: Option<::toml::Table>,
        env_overrides: HashMap<String, String>,
        cli_overrides: HashMap<String, String>,
    ) -> ConfigResult<LokrToml> {
        let mut merged = global.unwrap_or_default();
        if let Some(project) = project {
            deep_merge(&mut merged, project);
        }
        // Validates the file layers on their own before overrides apply
        let mut config = from_table(merged)?;

        Self::apply_env_overrides(&mut config, &env_overrides)?;
        Self::apply_cli_overrides(&mut config, &cli_overrides)?;
        crate::toml::validate_config(&config)?;
        Ok(config)
    }

    fn apply_env_overrides(config: &mut LokrToml, overrides: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in overrides {
            match key.as_str() {
                ENV_STORAGE_BACKEND => config.storage.backend = value.parse()?,
                ENV_STORAGE_ROOT => config.storage.root = Utf8PathBuf::from(value),
                ENV_BACKEND_TIMEOUT_MS => config.storage.timeout_ms = parse_number(key, value)?,
                ENV_METADATA_URL => config.metadata.url = value.clone(),
                ENV_DEFAULT_QUOTA => config.quota.default_bytes = parse_number(key, value)?,
                ENV_PUBLIC_BASE_URL => config.sharing.public_base_url = value.clone(),
                _ => debug!("Ignoring unknown environment variable {}", key),
            }
        }
        Ok(())
    }

    fn apply_cli_overrides(config: &mut LokrToml, overrides: &HashMap<String, String>) -> ConfigResult<()> {
        for (key, value) in overrides {
            match key.as_str() {
                "storage.backend" => config.storage.backend = value.parse::<BackendKind>()?,
                "storage.root" => config.storage.root = Utf8PathBuf::from(value),
                "storage.timeout_ms" => config.storage.timeout_ms = parse_number(key, value)?,
                "metadata.url" => config.metadata.url = value.clone(),
                "sharing.public_base_url" => config.sharing.public_base_url = value.clone(),
                _ => debug!("Ignoring unknown override {}", key),
            }
        }
        Ok(())
    }

    /// Collect `LOKR_*` variables from the process environment
    pub fn collect_env_overrides() -> HashMap<String, String> {
        Self::filter_env(std::env::vars())
    }

    /// Keep only `LOKR_*` variables, excluding the log filter
    pub fn filter_env(vars: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
        vars.into_iter()
            .filter(|(key, _)| key.starts_with("LOKR_") && key != "LOKR_LOG")
            .collect()
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| LokrError::ConfigValidation {
        field: field.to_string(),
        reason: format!("'{}' is not a valid number: {}", value, e),
    })
}

/// Merge `overlay` into `base`; nested tables merge, other values replace
fn deep_merge(base: &mut ::toml::Table, overlay: ::toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(::toml::Value::Table(existing)), ::toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
