//! Centralized configuration for the registry core.
//!
//! Constants are grouped by concern. The configuration file model covers
//! registry-source selection and storage selection only.

use crate::error::{RegistryError, Result};
use crate::model::{CreationType, Registry, RegistryDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pagination wire constants.
pub struct PaginationConfig;

impl PaginationConfig {
    /// Separator inside a decoded cursor. Never occurs in entry names, ISO
    /// timestamps or semantic versions.
    pub const CURSOR_SEPARATOR: char = ',';
    /// Reserved version alias resolved to the entry flagged as latest.
    pub const LATEST_VERSION: &'static str = "latest";
}

/// Aggregated-view naming.
pub struct NamingConfig;

impl NamingConfig {
    pub const PREFIX_DELIMITER: &'static str = ".";
}

/// Snapshot cache defaults for the read-facing service.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const CACHE_TTL: Duration = Duration::from_secs(30);
}

/// Relational backend defaults.
pub struct DatabaseDefaults;

impl DatabaseDefaults {
    pub const MAX_CONNECTIONS: usize = 4;
    pub const BUSY_TIMEOUT_MS: u64 = 5000;
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
}

/// File layout of the embedded file store.
pub struct PathsConfig;

impl PathsConfig {
    pub const REGISTRIES_FILE: &'static str = "registries.json";
    pub const CATALOG_DIR_NAME: &'static str = "catalog";
}

/// Entry families with their own list-limit defaults and caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryFamily {
    Servers,
    Skills,
}

impl EntryFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryFamily::Servers => "servers",
            EntryFamily::Skills => "skills",
        }
    }

    pub fn default_limit(&self) -> usize {
        match self {
            EntryFamily::Servers => 50,
            EntryFamily::Skills => 30,
        }
    }

    pub fn max_limit(&self) -> usize {
        match self {
            EntryFamily::Servers => 100,
            EntryFamily::Skills => 1000,
        }
    }

    /// Effective page size: the family default when unset, clamped to the cap.
    pub fn resolve_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or_else(|| self.default_limit())
            .clamp(1, self.max_limit())
    }

    /// Parse a raw `limit` query parameter, rejecting anything outside 1..=cap.
    pub fn parse_limit(&self, raw: Option<&str>) -> Result<Option<usize>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(n) if n >= 1 && n as usize <= self.max_limit() => Ok(Some(n as usize)),
            _ => Err(RegistryError::validation(format!(
                "invalid limit parameter: must be between 1 and {}",
                self.max_limit()
            ))),
        }
    }
}

impl std::fmt::Display for EntryFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings for the embedded file store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStorageConfig {
    pub base_dir: PathBuf,
}

/// Settings for the relational (SQLite) store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    DatabaseDefaults::MAX_CONNECTIONS
}

fn default_busy_timeout_ms() -> u64 {
    DatabaseDefaults::BUSY_TIMEOUT_MS
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: DatabaseDefaults::MAX_CONNECTIONS,
            busy_timeout_ms: DatabaseDefaults::BUSY_TIMEOUT_MS,
        }
    }
}

/// Which backend to use, as written in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    File,
    Database,
}

/// Storage selection section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(default)]
    pub file: Option<FileStorageConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Root of the registry configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfigFile {
    #[serde(default)]
    pub registries: Vec<RegistryDefinition>,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

impl RegistryConfigFile {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| RegistryError::io_with_path(e, path))?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(contents: &str) -> Result<Self> {
        let config: RegistryConfigFile =
            serde_json::from_str(contents).map_err(|e| RegistryError::Config {
                message: format!("failed to parse registry configuration: {}", e),
            })?;

        let mut seen = HashSet::new();
        for def in &config.registries {
            if !seen.insert(def.name.as_str()) {
                return Err(RegistryError::InvalidRegistryConfig {
                    message: format!("duplicate registry name '{}'", def.name),
                });
            }
        }

        Ok(config)
    }

    /// Convert every definition into a CONFIG-created registry.
    pub fn config_registries(&self) -> Result<Vec<Registry>> {
        self.registries
            .iter()
            .map(|def| def.to_registry(CreationType::Config))
            .collect()
    }
}
