//! Registry and catalog data model.

use crate::config::PaginationConfig;
use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

// ========================================
// Registries
// ========================================

/// How a registry came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CreationType {
    /// Created through the API; mutable and deletable through the API.
    Api,
    /// Loaded from configuration; immutable through the API.
    Config,
}

/// Wire format of the upstream data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryFormat {
    #[default]
    Native,
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub repository: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSource {
    pub endpoint: String,
}

/// File source. Inline `data` makes the registry self-contained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedSource {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSource {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// The single source a registry draws its entries from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrySource {
    Git(GitSource),
    Api(ApiSource),
    File(FileSource),
    Managed,
    Kubernetes(KubernetesSource),
}

impl RegistrySource {
    pub fn type_name(&self) -> &'static str {
        match self {
            RegistrySource::Git(_) => "git",
            RegistrySource::Api(_) => "api",
            RegistrySource::File(_) => "file",
            RegistrySource::Managed => "managed",
            RegistrySource::Kubernetes(_) => "kubernetes",
        }
    }

    /// Sources that need no sync schedule.
    pub fn is_self_contained(&self) -> bool {
        match self {
            RegistrySource::Managed | RegistrySource::Kubernetes(_) => true,
            RegistrySource::File(file) => file.data.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Filter rules applied to synced entries before they are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRules {
    /// Glob patterns over entry names (`*` matches any run of characters).
    #[serde(default)]
    pub names: PatternFilter,
    /// Exact tag values.
    #[serde(default)]
    pub tags: PatternFilter,
}

impl FilterRules {
    /// Check that every name pattern compiles.
    pub fn validate(&self) -> Result<()> {
        for pattern in self.names.include.iter().chain(&self.names.exclude) {
            glob_regex(pattern)?;
        }
        Ok(())
    }

    /// Whether an entry with this name and these tags survives the filter.
    pub fn allows(&self, name: &str, tags: &[String]) -> bool {
        let name_ok = (self.names.include.is_empty()
            || self.names.include.iter().any(|p| glob_matches(p, name)))
            && !self.names.exclude.iter().any(|p| glob_matches(p, name));

        let tags_ok = (self.tags.include.is_empty()
            || tags.iter().any(|t| self.tags.include.contains(t)))
            && !tags.iter().any(|t| self.tags.exclude.contains(t));

        name_ok && tags_ok
    }
}

fn glob_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| RegistryError::InvalidRegistryConfig {
        message: format!("invalid filter pattern '{}': {}", pattern, e),
    })
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    glob_regex(pattern).map(|re| re.is_match(name)).unwrap_or(false)
}

/// Phase of the most recent synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Pending,
    Syncing,
    Complete,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Pending => "pending",
            SyncPhase::Syncing => "syncing",
            SyncPhase::Complete => "complete",
            SyncPhase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncPhase::Pending),
            "syncing" => Some(SyncPhase::Syncing),
            "complete" => Some(SyncPhase::Complete),
            "failed" => Some(SyncPhase::Failed),
            _ => None,
        }
    }
}

/// Sync bookkeeping embedded in every registry record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub entry_count: usize,
    #[serde(default)]
    pub message: Option<String>,
}

/// A named, independently-sourced collection of catalog entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub name: String,
    pub source: RegistrySource,
    pub creation_type: CreationType,
    #[serde(default)]
    pub format: RegistryFormat,
    #[serde(default)]
    pub filter: Option<FilterRules>,
    #[serde(default)]
    pub sync_policy: Option<SyncPolicy>,
    #[serde(default)]
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registry {
    pub fn source_type(&self) -> &'static str {
        self.source.type_name()
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.source, RegistrySource::Managed)
    }
}

/// User-facing registry definition as it appears in configuration or an API
/// request. Exactly one of the source fields must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDefinition {
    pub name: String,
    #[serde(default)]
    pub format: RegistryFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubernetesSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterRules>,
}

impl RegistryDefinition {
    /// Resolve the single configured source.
    pub fn source(&self) -> Result<RegistrySource> {
        let mut sources = Vec::new();
        if let Some(git) = &self.git {
            sources.push(RegistrySource::Git(git.clone()));
        }
        if let Some(api) = &self.api {
            sources.push(RegistrySource::Api(api.clone()));
        }
        if let Some(file) = &self.file {
            sources.push(RegistrySource::File(file.clone()));
        }
        if self.managed.is_some() {
            sources.push(RegistrySource::Managed);
        }
        if let Some(k8s) = &self.kubernetes {
            sources.push(RegistrySource::Kubernetes(k8s.clone()));
        }

        match sources.len() {
            1 => Ok(sources.remove(0)),
            0 => Err(RegistryError::InvalidRegistryConfig {
                message: format!("registry '{}' has no source configured", self.name),
            }),
            n => Err(RegistryError::InvalidRegistryConfig {
                message: format!(
                    "registry '{}' has {} sources configured; exactly one is allowed",
                    self.name, n
                ),
            }),
        }
    }

    /// Validate and convert into a registry record.
    pub fn to_registry(&self, creation_type: CreationType) -> Result<Registry> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::InvalidRegistryConfig {
                message: "registry name is required".to_string(),
            });
        }
        if !is_valid_registry_name(&self.name) {
            return Err(RegistryError::InvalidRegistryConfig {
                message: format!(
                    "registry name '{}' may only contain letters, digits, '-', '_' and '.', and must not start with '.'",
                    self.name
                ),
            });
        }

        let source = self.source()?;
        validate_source(&self.name, &source)?;

        match self.sync_policy {
            None if !source.is_self_contained() => {
                return Err(RegistryError::InvalidRegistryConfig {
                    message: format!(
                        "registry '{}' requires a sync policy for a {} source",
                        self.name,
                        source.type_name()
                    ),
                });
            }
            Some(policy) if policy.interval_secs == 0 => {
                return Err(RegistryError::InvalidRegistryConfig {
                    message: format!("registry '{}' has a zero sync interval", self.name),
                });
            }
            _ => {}
        }

        if let Some(filter) = &self.filter {
            filter.validate()?;
        }

        let now = Utc::now();
        Ok(Registry {
            name: self.name.clone(),
            source,
            creation_type,
            format: self.format,
            filter: self.filter.clone(),
            sync_policy: self.sync_policy,
            sync_status: SyncStatus::default(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn is_valid_registry_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_source(name: &str, source: &RegistrySource) -> Result<()> {
    let missing = |field: &str| RegistryError::InvalidRegistryConfig {
        message: format!("registry '{}': {} is required", name, field),
    };
    match source {
        RegistrySource::Git(git) => {
            if git.repository.is_empty() {
                return Err(missing("git.repository"));
            }
            if git.path.is_empty() {
                return Err(missing("git.path"));
            }
        }
        RegistrySource::Api(api) if api.endpoint.is_empty() => {
            return Err(missing("api.endpoint"));
        }
        RegistrySource::File(file) => match (&file.path, &file.data) {
            (None, None) => return Err(missing("file.path or file.data")),
            (Some(_), Some(_)) => {
                return Err(RegistryError::InvalidRegistryConfig {
                    message: format!(
                        "registry '{}': file.path and file.data are mutually exclusive",
                        name
                    ),
                })
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

// ========================================
// Catalog entries
// ========================================

/// Lifecycle status of a catalog entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Active,
    Deprecated,
    Deleted,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Deprecated => "deprecated",
            EntryStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(EntryStatus::Active),
            "deprecated" => Some(EntryStatus::Deprecated),
            "deleted" => Some(EntryStatus::Deleted),
            _ => None,
        }
    }

    /// Parse a comma-separated status filter such as `active,deprecated`.
    pub fn parse_list(csv: &str) -> Result<Vec<Self>> {
        csv.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                Self::parse(s).ok_or_else(|| {
                    RegistryError::validation(format!("invalid status value '{}'", s.trim()))
                })
            })
            .collect()
    }
}

/// A versioned MCP server record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ServerEntry {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            status: EntryStatus::Active,
            is_latest: false,
            tags: Vec::new(),
            updated_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// A versioned skill record. Skills always live in a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SkillEntry {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            description: description.into(),
            status: EntryStatus::Active,
            is_latest: false,
            tags: Vec::new(),
            updated_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Shared view over servers and skills used by filtering, pagination and
/// latest-version bookkeeping.
pub trait CatalogEntry: Clone + Send + Sync + 'static {
    fn namespace(&self) -> Option<&str>;
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
    fn version(&self) -> &str;
    fn description(&self) -> &str;
    fn status(&self) -> EntryStatus;
    fn tags(&self) -> &[String];
    fn is_latest(&self) -> bool;
    fn set_latest(&mut self, latest: bool);
    fn updated_at(&self) -> DateTime<Utc>;

    /// Name component carried in a pagination cursor.
    fn cursor_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name()),
            None => self.name().to_string(),
        }
    }

    /// Check the required publish fields in order; the first missing field
    /// determines the message.
    fn validate_for_publish(&self) -> Result<()> {
        if let Some(ns) = self.namespace() {
            if ns.trim().is_empty() {
                return Err(RegistryError::validation("namespace is required"));
            }
            if ns.contains('/') {
                return Err(RegistryError::validation("namespace must not contain '/'"));
            }
        }
        if self.name().trim().is_empty() {
            return Err(RegistryError::validation("name is required"));
        }
        if self.description().trim().is_empty() {
            return Err(RegistryError::validation("description is required"));
        }
        if self.version().trim().is_empty() {
            return Err(RegistryError::validation("version is required"));
        }
        if self.version() == PaginationConfig::LATEST_VERSION {
            return Err(RegistryError::validation(format!(
                "version '{}' is reserved",
                PaginationConfig::LATEST_VERSION
            )));
        }
        if self.version().contains(PaginationConfig::CURSOR_SEPARATOR)
            || self.name().contains(PaginationConfig::CURSOR_SEPARATOR)
        {
            return Err(RegistryError::validation(format!(
                "name and version must not contain '{}'",
                PaginationConfig::CURSOR_SEPARATOR
            )));
        }
        Ok(())
    }
}

impl CatalogEntry for ServerEntry {
    fn namespace(&self) -> Option<&str> {
        None
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn version(&self) -> &str {
        &self.version
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn status(&self) -> EntryStatus {
        self.status
    }
    fn tags(&self) -> &[String] {
        &self.tags
    }
    fn is_latest(&self) -> bool {
        self.is_latest
    }
    fn set_latest(&mut self, latest: bool) {
        self.is_latest = latest;
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl CatalogEntry for SkillEntry {
    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn version(&self) -> &str {
        &self.version
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn status(&self) -> EntryStatus {
        self.status
    }
    fn tags(&self) -> &[String] {
        &self.tags
    }
    fn is_latest(&self) -> bool {
        self.is_latest
    }
    fn set_latest(&mut self, latest: bool) {
        self.is_latest = latest;
    }
    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// True when every version parses as semver.
pub fn all_semver<'a>(versions: impl IntoIterator<Item = &'a str>) -> bool {
    versions
        .into_iter()
        .all(|v| semver::Version::parse(v).is_ok())
}

/// Total order over the versions of one entry. `by_semver` is decided for the
/// whole group with [`all_semver`]; without it, versions order by
/// `updated_at` and then by string.
pub fn compare_versions<T: CatalogEntry>(a: &T, b: &T, by_semver: bool) -> Ordering {
    if by_semver {
        if let (Ok(va), Ok(vb)) = (
            semver::Version::parse(a.version()),
            semver::Version::parse(b.version()),
        ) {
            return va.cmp(&vb).then_with(|| a.version().cmp(b.version()));
        }
    }
    a.updated_at()
        .cmp(&b.updated_at())
        .then_with(|| a.version().cmp(b.version()))
}

/// Sort versions oldest to latest.
pub fn sort_versions<T: CatalogEntry>(versions: &mut [T]) {
    let by_semver = all_semver(versions.iter().map(|e| e.version()));
    versions.sort_by(|a, b| compare_versions(a, b, by_semver));
}

/// Flag exactly one latest version per (namespace, name): the highest semver
/// when every version of the entry parses, otherwise the most recently
/// updated.
pub fn recompute_latest<T: CatalogEntry>(entries: &mut [T]) {
    let mut groups: HashMap<(Option<String>, String), Vec<usize>> = HashMap::new();
    for (idx, entry) in entries.iter().enumerate() {
        let key = (entry.namespace().map(String::from), entry.name().to_string());
        groups.entry(key).or_default().push(idx);
    }

    let mut winners = HashSet::new();
    for members in groups.values() {
        let by_semver = all_semver(members.iter().map(|&i| entries[i].version()));
        let best = members
            .iter()
            .copied()
            .max_by(|&a, &b| compare_versions(&entries[a], &entries[b], by_semver));
        if let Some(best) = best {
            winners.insert(best);
        }
    }

    for (idx, entry) in entries.iter_mut().enumerate() {
        entry.set_latest(winners.contains(&idx));
    }
}

// ========================================
// Catalog snapshots and pages
// ========================================

/// Entries of one registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCatalog {
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
}

impl RegistryCatalog {
    pub fn entry_count(&self) -> usize {
        self.servers.len() + self.skills.len()
    }
}

/// Aggregate of every registry's catalog, keyed and ordered by registry name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub registries: BTreeMap<String, RegistryCatalog>,
}

impl CatalogSnapshot {
    pub fn get(&self, registry: &str) -> Option<&RegistryCatalog> {
        self.registries.get(registry)
    }

    pub fn contains(&self, registry: &str) -> bool {
        self.registries.contains_key(registry)
    }

    pub fn entry_count(&self) -> usize {
        self.registries.values().map(RegistryCatalog::entry_count).sum()
    }
}

/// One page of a listing. An empty `next_cursor` means no further pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub entries: Vec<T>,
    pub next_cursor: String,
}

impl<T> ListResult<T> {
    pub fn has_more(&self) -> bool {
        !self.next_cursor.is_empty()
    }
}
