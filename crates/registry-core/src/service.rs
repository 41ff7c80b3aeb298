//! Read-facing registry service with a TTL-cached catalog snapshot.
//!
//! Reads are answered from an immutable [`CatalogSnapshot`] behind an `Arc`.
//! An expired snapshot is refreshed synchronously by the first reader that
//! notices; concurrent readers wait on the refresh mutex and reuse its result.
//! A failed refresh keeps the previous snapshot.

use crate::config::{CacheDefaults, EntryFamily, PaginationConfig};
use crate::cursor::{encode_cursor, Cursor};
use crate::error::{RegistryError, Result};
use crate::model::{
    sort_versions, CatalogEntry, CatalogSnapshot, CreationType, EntryStatus, ListResult,
    Registry, RegistryCatalog, RegistryDefinition, ServerEntry, SkillEntry,
};
use crate::naming;
use crate::options::{
    configure, require, DeleteServerVersionOptions, DeleteSkillVersionOptions,
    GetServerVersionOptions, GetSkillVersionOptions, ListServerVersionsOptions, ListServersOptions,
    ListSkillVersionsOptions, ListSkillsOptions, PublishOptions, QueryOption,
};
use crate::provider::RegistryDataProvider;
use crate::storage::CatalogStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tuning for [`RegistryService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long a fetched snapshot answers reads before a refresh.
    pub cache_ttl: Duration,
    /// Upper bound for one provider fetch. `None` waits indefinitely.
    pub fetch_timeout: Option<Duration>,
    /// Reject every mutation with `NotImplemented`.
    pub read_only: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: CacheDefaults::CACHE_TTL,
            fetch_timeout: None,
            read_only: false,
        }
    }
}

struct CachedSnapshot {
    snapshot: Arc<CatalogSnapshot>,
    fetched_at: Instant,
    invalidated: bool,
}

impl CachedSnapshot {
    fn new(snapshot: Arc<CatalogSnapshot>, invalidated: bool) -> Self {
        Self {
            snapshot,
            fetched_at: Instant::now(),
            invalidated,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.fetched_at.elapsed() < ttl
    }
}

/// Entry families the service lists and resolves generically.
trait FamilyEntry: CatalogEntry {
    const FAMILY: EntryFamily;

    fn entries(catalog: &RegistryCatalog) -> &[Self];
}

impl FamilyEntry for ServerEntry {
    const FAMILY: EntryFamily = EntryFamily::Servers;

    fn entries(catalog: &RegistryCatalog) -> &[Self] {
        &catalog.servers
    }
}

impl FamilyEntry for SkillEntry {
    const FAMILY: EntryFamily = EntryFamily::Skills;

    fn entries(catalog: &RegistryCatalog) -> &[Self] {
        &catalog.skills
    }
}

/// Normalized listing query shared by both families.
struct ListQuery<'a> {
    registry: Option<&'a str>,
    namespace: Option<&'a str>,
    search: Option<&'a str>,
    status: Option<&'a [EntryStatus]>,
    version: Option<&'a str>,
    updated_since: Option<DateTime<Utc>>,
    cursor: Option<&'a Cursor>,
    limit: Option<usize>,
}

/// Aggregated, paginated view over every registry plus the mutation and
/// registry-administration paths.
pub struct RegistryService {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn RegistryDataProvider>,
    config: ServiceConfig,
    cache: RwLock<Option<CachedSnapshot>>,
    refresh_lock: Mutex<()>,
    /// Bumped by every invalidation; a fetch that overlaps a bump is stored
    /// already stale.
    generation: AtomicU64,
}

impl RegistryService {
    /// Build the service and fetch the initial snapshot. A failing provider
    /// fails construction.
    pub async fn new(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn RegistryDataProvider>,
        config: ServiceConfig,
    ) -> Result<Self> {
        let service = Self {
            store,
            provider,
            config,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        };

        let snapshot = Arc::new(service.fetch().await?);
        info!(
            "Registry service ready with {} entries across {} registries (provider: {})",
            snapshot.entry_count(),
            snapshot.registries.len(),
            service.provider.name()
        );
        *service.cache.write().await = Some(CachedSnapshot::new(snapshot, false));
        Ok(service)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ========================================
    // Snapshot cache
    // ========================================

    async fn fetch(&self) -> Result<CatalogSnapshot> {
        let fetch = self.provider.fetch_catalog();
        match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| RegistryError::Timeout(limit))?,
            None => fetch.await,
        }
    }

    async fn fresh_snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.cache
            .read()
            .await
            .as_ref()
            .filter(|cached| cached.is_fresh(self.config.cache_ttl))
            .map(|cached| Arc::clone(&cached.snapshot))
    }

    /// Cache a snapshot fetched at `generation`. An invalidation since then
    /// leaves it stale so the next read refetches.
    async fn store_snapshot(&self, snapshot: CatalogSnapshot, generation: u64) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut cache = self.cache.write().await;
        let invalidated = self.generation.load(Ordering::SeqCst) != generation;
        if invalidated {
            debug!("Catalog changed during refresh, caching snapshot as stale");
        }
        *cache = Some(CachedSnapshot::new(Arc::clone(&snapshot), invalidated));
        snapshot
    }

    /// Current snapshot, refreshing it first when expired.
    async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let _refresh = self.refresh_lock.lock().await;
        if let Some(snapshot) = self.fresh_snapshot().await {
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        match self.fetch().await {
            Ok(snapshot) => {
                debug!("Refreshed catalog snapshot from {}", self.provider.name());
                Ok(self.store_snapshot(snapshot, generation).await)
            }
            Err(e) => match self.cache.read().await.as_ref() {
                Some(cached) => {
                    warn!(
                        "Catalog refresh from {} failed, serving previous snapshot: {}",
                        self.provider.name(),
                        e
                    );
                    Ok(Arc::clone(&cached.snapshot))
                }
                None => Err(e),
            },
        }
    }

    /// Force the next read to refetch. The current snapshot is kept as the
    /// fallback for a failing refresh.
    pub async fn invalidate_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cached) = self.cache.write().await.as_mut() {
            cached.invalidated = true;
        }
    }

    /// Fetch from the provider, failing on any provider error even when a
    /// cached snapshot exists. Success refreshes the cache.
    pub async fn check_readiness(&self) -> Result<()> {
        let _refresh = self.refresh_lock.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = self.fetch().await?;
        self.store_snapshot(snapshot, generation).await;
        Ok(())
    }

    // ========================================
    // Servers
    // ========================================

    pub async fn list_servers(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<ListResult<ServerEntry>> {
        let opts: ListServersOptions = configure(options)?;
        let snapshot = self.snapshot().await?;
        list_entries(
            &snapshot,
            &ListQuery {
                registry: opts.registry_name.as_deref(),
                namespace: None,
                search: opts.search.as_deref(),
                status: opts.status.as_deref(),
                version: opts.version.as_deref(),
                updated_since: opts.updated_since,
                cursor: opts.cursor.as_ref(),
                limit: opts.limit,
            },
        )
    }

    pub async fn list_server_versions(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<Vec<ServerEntry>> {
        let opts: ListServerVersionsOptions = configure(options)?;
        let name = require(&opts.name, "name")?;
        let snapshot = self.snapshot().await?;
        find_versions(&snapshot, opts.registry_name.as_deref(), None, name)
    }

    pub async fn get_server_version(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<ServerEntry> {
        let opts: GetServerVersionOptions = configure(options)?;
        let name = require(&opts.name, "name")?;
        let version = require(&opts.version, "version")?;
        let snapshot = self.snapshot().await?;
        let versions = find_versions(&snapshot, opts.registry_name.as_deref(), None, name)?;
        pick_version(versions, name, version)
    }

    pub async fn publish_server_version(
        &self,
        entry: ServerEntry,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<ServerEntry> {
        let opts: PublishOptions = configure(options)?;
        let registry = require(&opts.registry_name, "registry")?;
        self.ensure_writable("publish")?;
        entry.validate_for_publish()?;
        self.require_managed(registry).await?;

        let stored = self.store.insert_server(registry, entry).await?;
        self.invalidate_cache().await;
        info!("Published server {} {} to {}", stored.name, stored.version, registry);
        Ok(stored)
    }

    pub async fn delete_server_version(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<()> {
        let opts: DeleteServerVersionOptions = configure(options)?;
        let registry = require(&opts.registry_name, "registry")?;
        let name = require(&opts.name, "name")?;
        let version = require(&opts.version, "version")?;
        self.ensure_writable("delete")?;
        self.require_managed(registry).await?;

        self.store.delete_server(registry, name, version).await?;
        self.invalidate_cache().await;
        info!("Deleted server {} {} from {}", name, version, registry);
        Ok(())
    }

    // ========================================
    // Skills
    // ========================================

    pub async fn list_skills(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<ListResult<SkillEntry>> {
        let opts: ListSkillsOptions = configure(options)?;
        let snapshot = self.snapshot().await?;
        list_entries(
            &snapshot,
            &ListQuery {
                registry: opts.registry_name.as_deref(),
                namespace: opts.namespace.as_deref(),
                search: opts.search.as_deref(),
                status: opts.status.as_deref(),
                version: opts.version.as_deref(),
                updated_since: opts.updated_since,
                cursor: opts.cursor.as_ref(),
                limit: opts.limit,
            },
        )
    }

    pub async fn list_skill_versions(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<Vec<SkillEntry>> {
        let opts: ListSkillVersionsOptions = configure(options)?;
        let namespace = require(&opts.namespace, "namespace")?;
        let name = require(&opts.name, "name")?;
        let snapshot = self.snapshot().await?;
        find_versions(&snapshot, opts.registry_name.as_deref(), Some(namespace), name)
    }

    pub async fn get_skill_version(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<SkillEntry> {
        let opts: GetSkillVersionOptions = configure(options)?;
        let namespace = require(&opts.namespace, "namespace")?;
        let name = require(&opts.name, "name")?;
        let version = require(&opts.version, "version")?;
        let snapshot = self.snapshot().await?;
        let versions =
            find_versions(&snapshot, opts.registry_name.as_deref(), Some(namespace), name)?;
        pick_version(versions, name, version)
    }

    pub async fn publish_skill_version(
        &self,
        entry: SkillEntry,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<SkillEntry> {
        let opts: PublishOptions = configure(options)?;
        let registry = require(&opts.registry_name, "registry")?;
        self.ensure_writable("publish")?;
        entry.validate_for_publish()?;
        self.require_managed(registry).await?;

        let stored = self.store.insert_skill(registry, entry).await?;
        self.invalidate_cache().await;
        info!(
            "Published skill {}/{} {} to {}",
            stored.namespace, stored.name, stored.version, registry
        );
        Ok(stored)
    }

    pub async fn delete_skill_version(
        &self,
        options: impl IntoIterator<Item = QueryOption>,
    ) -> Result<()> {
        let opts: DeleteSkillVersionOptions = configure(options)?;
        let registry = require(&opts.registry_name, "registry")?;
        let namespace = require(&opts.namespace, "namespace")?;
        let name = require(&opts.name, "name")?;
        let version = require(&opts.version, "version")?;
        self.ensure_writable("delete")?;
        self.require_managed(registry).await?;

        self.store
            .delete_skill(registry, namespace, name, version)
            .await?;
        self.invalidate_cache().await;
        info!(
            "Deleted skill {}/{} {} from {}",
            namespace, name, version, registry
        );
        Ok(())
    }

    // ========================================
    // Registry administration
    // ========================================

    pub async fn list_registries(&self) -> Result<Vec<Registry>> {
        self.store.list_registries().await
    }

    pub async fn get_registry(&self, name: &str) -> Result<Registry> {
        self.store
            .get_registry(name)
            .await?
            .ok_or_else(|| RegistryError::RegistryNotFound {
                name: name.to_string(),
            })
    }

    /// Create an API-owned registry.
    pub async fn create_registry(&self, definition: &RegistryDefinition) -> Result<Registry> {
        self.ensure_writable("create registry")?;
        let registry = definition.to_registry(CreationType::Api)?;
        self.store.insert_registry(&registry).await?;
        self.invalidate_cache().await;
        info!(
            "Created registry {} ({} source)",
            registry.name,
            registry.source_type()
        );
        Ok(registry)
    }

    /// Replace the definition of an API-owned registry. The source kind is
    /// fixed at creation.
    pub async fn update_registry(
        &self,
        name: &str,
        definition: &RegistryDefinition,
    ) -> Result<Registry> {
        self.ensure_writable("update registry")?;
        let existing = self.get_registry(name).await?;
        if existing.creation_type == CreationType::Config {
            return Err(RegistryError::ConfigRegistry {
                name: name.to_string(),
            });
        }

        let mut definition = definition.clone();
        definition.name = name.to_string();
        let mut updated = definition.to_registry(CreationType::Api)?;
        if updated.source_type() != existing.source_type() {
            return Err(RegistryError::SourceTypeChangeNotAllowed {
                name: name.to_string(),
                from: existing.source_type().to_string(),
                to: updated.source_type().to_string(),
            });
        }
        updated.created_at = existing.created_at;
        updated.sync_status = existing.sync_status;

        self.store.update_registry(&updated).await?;
        self.invalidate_cache().await;
        info!("Updated registry {}", name);
        Ok(updated)
    }

    /// Delete an API-owned registry and every entry it holds.
    pub async fn delete_registry(&self, name: &str) -> Result<()> {
        self.ensure_writable("delete registry")?;
        let existing = self.get_registry(name).await?;
        if existing.creation_type == CreationType::Config {
            return Err(RegistryError::ConfigRegistry {
                name: name.to_string(),
            });
        }

        self.store.delete_registry(name).await?;
        self.invalidate_cache().await;
        info!("Deleted registry {}", name);
        Ok(())
    }

    // ========================================
    // Mutation guards
    // ========================================

    fn ensure_writable(&self, operation: &str) -> Result<()> {
        if self.config.read_only {
            return Err(RegistryError::NotImplemented {
                feature: format!("{} on a read-only registry service", operation),
            });
        }
        Ok(())
    }

    async fn require_managed(&self, registry: &str) -> Result<()> {
        let record = self.get_registry(registry).await?;
        if !record.is_managed() {
            return Err(RegistryError::NotManagedRegistry {
                name: registry.to_string(),
            });
        }
        Ok(())
    }
}

// ========================================
// Query evaluation
// ========================================

/// Registries a read covers: the scoped one (which must exist) or all.
fn scoped_registries<'a>(
    snapshot: &'a CatalogSnapshot,
    scope: Option<&str>,
) -> Result<Vec<(&'a str, &'a RegistryCatalog)>> {
    match scope {
        Some(name) => snapshot
            .registries
            .get_key_value(name)
            .map(|(key, catalog)| vec![(key.as_str(), catalog)])
            .ok_or_else(|| RegistryError::RegistryNotFound {
                name: name.to_string(),
            }),
        None => Ok(snapshot
            .registries
            .iter()
            .map(|(key, catalog)| (key.as_str(), catalog))
            .collect()),
    }
}

fn sort_key<T: CatalogEntry>(entry: &T) -> (&str, &str, &str) {
    (entry.namespace().unwrap_or(""), entry.name(), entry.version())
}

/// Position a decoded cursor in the (namespace, name, version) ordering.
fn cursor_key<T: FamilyEntry>(cursor: &Cursor) -> Result<(&str, &str, &str)> {
    match T::FAMILY {
        EntryFamily::Servers => Ok(("", cursor.name.as_str(), cursor.version.as_str())),
        EntryFamily::Skills => {
            let (namespace, name) =
                cursor
                    .name
                    .split_once('/')
                    .ok_or_else(|| RegistryError::InvalidCursor {
                        message: "skill cursor name must be '<namespace>/<name>'".to_string(),
                    })?;
            Ok((namespace, name, cursor.version.as_str()))
        }
    }
}

fn list_entries<T: FamilyEntry>(
    snapshot: &CatalogSnapshot,
    query: &ListQuery<'_>,
) -> Result<ListResult<T>> {
    let limit = T::FAMILY.resolve_limit(query.limit);
    let search = query.search.map(str::to_lowercase);

    let mut matched = Vec::new();
    for (registry, catalog) in scoped_registries(snapshot, query.registry)? {
        for entry in T::entries(catalog) {
            if query.namespace.is_some() && entry.namespace() != query.namespace {
                continue;
            }
            if let Some(statuses) = query.status {
                if !statuses.is_empty() && !statuses.contains(&entry.status()) {
                    continue;
                }
            }
            if let Some(version) = query.version {
                let keep = if version == PaginationConfig::LATEST_VERSION {
                    entry.is_latest()
                } else {
                    entry.version() == version
                };
                if !keep {
                    continue;
                }
            }
            if let Some(since) = query.updated_since {
                if entry.updated_at() < since {
                    continue;
                }
            }

            let rendered = naming::display_name(query.registry, registry, entry.name());
            if let Some(term) = &search {
                if !rendered.to_lowercase().contains(term)
                    && !entry.description().to_lowercase().contains(term)
                {
                    continue;
                }
            }

            let mut out = entry.clone();
            out.set_name(rendered);
            matched.push(out);
        }
    }

    matched.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    let start = match query.cursor.filter(|c| !c.is_start()) {
        Some(cursor) => {
            let after = cursor_key::<T>(cursor)?;
            matched.partition_point(|e| sort_key(e) <= after)
        }
        None => 0,
    };

    let end = (start + limit).min(matched.len());
    let has_more = end < matched.len();
    let entries: Vec<T> = matched.drain(start..end).collect();
    let next_cursor = match entries.last() {
        Some(last) if has_more => encode_cursor(&last.cursor_name(), last.version()),
        _ => String::new(),
    };

    Ok(ListResult {
        entries,
        next_cursor,
    })
}

/// Every version of one entry, in ascending version order.
fn find_versions<T: FamilyEntry>(
    snapshot: &CatalogSnapshot,
    scope: Option<&str>,
    namespace: Option<&str>,
    name: &str,
) -> Result<Vec<T>> {
    let mut versions = Vec::new();
    for (registry, catalog) in scoped_registries(snapshot, scope)? {
        for entry in T::entries(catalog) {
            if entry.namespace() != namespace
                || !naming::matches(scope, registry, entry.name(), name)
            {
                continue;
            }
            let mut out = entry.clone();
            out.set_name(naming::display_name(scope, registry, entry.name()));
            versions.push(out);
        }
    }

    if versions.is_empty() {
        let what = match namespace {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        };
        return Err(RegistryError::NotFound { what });
    }

    sort_versions(&mut versions);
    Ok(versions)
}

/// Select one version; `latest` resolves to the flagged entry.
fn pick_version<T: CatalogEntry>(versions: Vec<T>, name: &str, version: &str) -> Result<T> {
    versions
        .into_iter()
        .find(|e| {
            if version == PaginationConfig::LATEST_VERSION {
                e.is_latest()
            } else {
                e.version() == version
            }
        })
        .ok_or_else(|| RegistryError::NotFound {
            what: format!("{} version {}", name, version),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::decode_cursor;
    use crate::options::{
        with_cursor, with_limit, with_name, with_namespace, with_registry_name, with_search,
        with_status, with_version,
    };
    use crate::storage::test_support::{git_registry, managed_registry};
    use crate::storage::FileCatalogStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Provider returning a fixed snapshot and counting fetches.
    struct CountingProvider {
        snapshot: std::sync::Mutex<CatalogSnapshot>,
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    impl CountingProvider {
        fn new(snapshot: CatalogSnapshot) -> Arc<Self> {
            Arc::new(Self {
                snapshot: std::sync::Mutex::new(snapshot),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::from_millis(10),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set(&self, snapshot: CatalogSnapshot) {
            *self.snapshot.lock().unwrap() = snapshot;
        }
    }

    #[async_trait]
    impl RegistryDataProvider for CountingProvider {
        async fn fetch_catalog(&self) -> Result<CatalogSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(RegistryError::Provider {
                    provider: "counting".to_string(),
                    message: "upstream unavailable".to_string(),
                });
            }
            Ok(self.snapshot.lock().unwrap().clone())
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn snapshot_of(registries: &[(&str, Vec<ServerEntry>)]) -> CatalogSnapshot {
        let mut map = BTreeMap::new();
        for (name, servers) in registries {
            let mut servers = servers.clone();
            crate::model::recompute_latest(&mut servers);
            map.insert(
                name.to_string(),
                RegistryCatalog {
                    servers,
                    skills: Vec::new(),
                },
            );
        }
        CatalogSnapshot { registries: map }
    }

    async fn service_with(
        temp_dir: &TempDir,
        provider: Arc<CountingProvider>,
    ) -> RegistryService {
        let store = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        RegistryService::new(store, provider, ServiceConfig::default())
            .await
            .unwrap()
    }

    fn names<T: CatalogEntry>(entries: &[T]) -> Vec<String> {
        entries.iter().map(|e| e.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_aggregate_read_prefixes_every_entry() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(snapshot_of(&[
            ("a", vec![ServerEntry::new("s", "1.0.0", "d")]),
            ("b", vec![ServerEntry::new("s", "1.0.0", "d")]),
        ]));
        let service = service_with(&temp_dir, provider).await;

        let page = service.list_servers(Vec::new()).await.unwrap();
        assert_eq!(names(&page.entries), vec!["a.s", "b.s"]);
        assert!(!page.has_more());

        let scoped = service
            .list_servers(vec![with_registry_name("a")])
            .await
            .unwrap();
        assert_eq!(names(&scoped.entries), vec!["s"]);
    }

    #[tokio::test]
    async fn test_scoped_read_of_unknown_registry() {
        let temp_dir = TempDir::new().unwrap();
        let service = service_with(&temp_dir, CountingProvider::new(CatalogSnapshot::default())).await;
        let err = service
            .list_servers(vec![with_registry_name("missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_pagination_walks_every_entry_once() {
        let temp_dir = TempDir::new().unwrap();
        let servers: Vec<ServerEntry> = (0..7)
            .map(|i| ServerEntry::new(format!("server-{}", i), "1.0.0", "d"))
            .collect();
        let provider = CountingProvider::new(snapshot_of(&[("a", servers)]));
        let service = service_with(&temp_dir, provider).await;

        let mut seen = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut options = vec![with_registry_name("a"), with_limit(3)];
            if !cursor.is_empty() {
                options.push(with_cursor(cursor.clone()));
            }
            let page = service.list_servers(options).await.unwrap();
            seen.extend(names(&page.entries));
            if !page.has_more() {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.first().map(String::as_str), Some("server-0"));
        assert_eq!(seen.last().map(String::as_str), Some("server-6"));
    }

    #[tokio::test]
    async fn test_next_cursor_names_last_returned_entry() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(snapshot_of(&[(
            "a",
            vec![
                ServerEntry::new("alpha", "1.0.0", "d"),
                ServerEntry::new("beta", "1.0.0", "d"),
            ],
        )]));
        let service = service_with(&temp_dir, provider).await;

        let page = service.list_servers(vec![with_limit(1)]).await.unwrap();
        let cursor = decode_cursor(&page.next_cursor).unwrap();
        assert_eq!(cursor, Cursor::new("a.alpha", "1.0.0"));
    }

    #[tokio::test]
    async fn test_filters() {
        let temp_dir = TempDir::new().unwrap();
        let mut deprecated = ServerEntry::new("old-fetch", "1.0.0", "Legacy fetcher");
        deprecated.status = EntryStatus::Deprecated;
        let provider = CountingProvider::new(snapshot_of(&[(
            "a",
            vec![
                ServerEntry::new("fetch", "1.0.0", "Fetches URLs"),
                ServerEntry::new("fetch", "2.0.0", "Fetches URLs"),
                ServerEntry::new("time", "1.0.0", "Tells TIME"),
                deprecated,
            ],
        )]));
        let service = service_with(&temp_dir, provider).await;

        let latest = service
            .list_servers(vec![with_registry_name("a"), with_version("latest")])
            .await
            .unwrap();
        assert_eq!(latest.entries.len(), 3);
        assert!(latest.entries.iter().all(|e| e.is_latest));

        let exact = service
            .list_servers(vec![with_version("2.0.0")])
            .await
            .unwrap();
        assert_eq!(exact.entries.len(), 1);

        let search = service
            .list_servers(vec![with_search("time")])
            .await
            .unwrap();
        assert_eq!(names(&search.entries), vec!["a.time"]);

        let by_status = service
            .list_servers(vec![with_status("deprecated")])
            .await
            .unwrap();
        assert_eq!(names(&by_status.entries), vec!["a.old-fetch"]);
    }

    #[tokio::test]
    async fn test_get_version_resolves_latest() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(snapshot_of(&[(
            "a",
            vec![
                ServerEntry::new("fetch", "1.9.0", "d"),
                ServerEntry::new("fetch", "1.10.0", "d"),
            ],
        )]));
        let service = service_with(&temp_dir, provider).await;

        let latest = service
            .get_server_version(vec![with_name("a.fetch"), with_version("latest")])
            .await
            .unwrap();
        assert_eq!(latest.version, "1.10.0");
        assert_eq!(latest.name, "a.fetch");

        let versions = service
            .list_server_versions(vec![with_registry_name("a"), with_name("fetch")])
            .await
            .unwrap();
        let listed: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(listed, vec!["1.9.0", "1.10.0"]);

        let err = service
            .get_server_version(vec![with_name("fetch"), with_version("1.0.0")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cursor_on_get_is_incompatible() {
        let temp_dir = TempDir::new().unwrap();
        let service = service_with(&temp_dir, CountingProvider::new(CatalogSnapshot::default())).await;
        let err = service
            .get_server_version(vec![with_cursor("abc")])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "option 'cursor' is not compatible with operation 'get_server_version'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_read_within_ttl_does_not_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(CatalogSnapshot::default());
        let service = service_with(&temp_dir, Arc::clone(&provider)).await;
        assert_eq!(provider.calls(), 1);

        service.list_servers(Vec::new()).await.unwrap();
        service.list_servers(Vec::new()).await.unwrap();
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_after_expiry_fetch_once() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(CatalogSnapshot::default());
        let service = Arc::new(service_with(&temp_dir, Arc::clone(&provider)).await);

        tokio::time::advance(CacheDefaults::CACHE_TTL + Duration::from_secs(1)).await;

        let reads = (0..8).map(|_| {
            let service = Arc::clone(&service);
            async move { service.list_servers(Vec::new()).await }
        });
        for result in futures::future::join_all(reads).await {
            result.unwrap();
        }
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_refresh_keeps_previous_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(snapshot_of(&[(
            "a",
            vec![ServerEntry::new("s", "1.0.0", "d")],
        )]));
        let service = service_with(&temp_dir, Arc::clone(&provider)).await;

        provider.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(CacheDefaults::CACHE_TTL + Duration::from_secs(1)).await;

        let page = service.list_servers(Vec::new()).await.unwrap();
        assert_eq!(names(&page.entries), vec!["a.s"]);
        assert_eq!(provider.calls(), 2);

        let err = service.check_readiness().await.unwrap_err();
        assert!(matches!(err, RegistryError::Provider { .. }));

        provider.fail.store(false, Ordering::SeqCst);
        provider.set(CatalogSnapshot::default());
        service.check_readiness().await.unwrap();
        let page = service.list_servers(Vec::new()).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_timeout_fails_construction() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(snapshot_of(&[(
            "a",
            vec![ServerEntry::new("s", "1.0.0", "d")],
        )]));
        let store = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        let config = ServiceConfig {
            fetch_timeout: Some(Duration::from_millis(5)),
            ..ServiceConfig::default()
        };

        let err = RegistryService::new(store, Arc::clone(&provider) as Arc<dyn RegistryDataProvider>, config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_construction_fails_without_initial_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let provider = CountingProvider::new(CatalogSnapshot::default());
        provider.fail.store(true, Ordering::SeqCst);
        let store = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        let result = RegistryService::new(store, provider, ServiceConfig::default()).await;
        assert!(result.is_err());
    }

    // ========================================
    // Mutations against a real store
    // ========================================

    async fn store_backed_service(temp_dir: &TempDir) -> (RegistryService, Arc<dyn CatalogStore>) {
        let store: Arc<dyn CatalogStore> = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        store.insert_registry(&git_registry("upstream")).await.unwrap();
        let provider = Arc::new(crate::provider::StoreDataProvider::new(Arc::clone(&store)));
        let service = RegistryService::new(Arc::clone(&store), provider, ServiceConfig::default())
            .await
            .unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn test_publish_is_visible_on_next_read() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _store) = store_backed_service(&temp_dir).await;

        let stored = service
            .publish_server_version(
                ServerEntry::new("fetch", "1.0.0", "Fetches URLs"),
                vec![with_registry_name("internal")],
            )
            .await
            .unwrap();
        assert!(stored.is_latest);

        let page = service
            .list_servers(vec![with_registry_name("internal")])
            .await
            .unwrap();
        assert_eq!(names(&page.entries), vec!["fetch"]);
    }

    /// Store-backed provider that can pause one fetch after it has read the
    /// store.
    struct GatedProvider {
        inner: crate::provider::StoreDataProvider,
        armed: AtomicBool,
        fetched: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl RegistryDataProvider for GatedProvider {
        async fn fetch_catalog(&self) -> Result<CatalogSnapshot> {
            let snapshot = self.inner.fetch_catalog().await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.fetched.notify_one();
                self.release.notified().await;
            }
            Ok(snapshot)
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_publish_during_refresh_is_visible_on_next_read() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn CatalogStore> = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        let provider = Arc::new(GatedProvider {
            inner: crate::provider::StoreDataProvider::new(Arc::clone(&store)),
            armed: AtomicBool::new(false),
            fetched: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let service = RegistryService::new(
            Arc::clone(&store),
            Arc::clone(&provider) as Arc<dyn RegistryDataProvider>,
            ServiceConfig::default(),
        )
        .await
        .unwrap();

        service.invalidate_cache().await;
        provider.armed.store(true, Ordering::SeqCst);
        let refresh = service.list_servers(vec![with_registry_name("internal")]);
        let publish = async {
            provider.fetched.notified().await;
            service
                .publish_server_version(
                    ServerEntry::new("fetch", "1.0.0", "Fetches URLs"),
                    vec![with_registry_name("internal")],
                )
                .await
                .unwrap();
            provider.release.notify_one();
        };
        let (overlapping, ()) = tokio::join!(refresh, publish);
        assert!(overlapping.unwrap().entries.is_empty());

        let page = service
            .list_servers(vec![with_registry_name("internal")])
            .await
            .unwrap();
        assert_eq!(names(&page.entries), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_mutation_policy() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _store) = store_backed_service(&temp_dir).await;
        let entry = || ServerEntry::new("fetch", "1.0.0", "Fetches URLs");

        let err = service
            .publish_server_version(entry(), vec![with_registry_name("upstream")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotManagedRegistry { .. }));

        let err = service
            .publish_server_version(entry(), vec![with_registry_name("missing")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));

        let err = service
            .publish_server_version(
                ServerEntry::new("fetch", "", "Fetches URLs"),
                vec![with_registry_name("internal")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "version is required");

        service
            .publish_server_version(entry(), vec![with_registry_name("internal")])
            .await
            .unwrap();
        let err = service
            .publish_server_version(entry(), vec![with_registry_name("internal")])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::VersionAlreadyExists { .. }));

        let err = service
            .delete_server_version(vec![
                with_registry_name("internal"),
                with_name("fetch"),
                with_version("9.9.9"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));

        service
            .delete_server_version(vec![
                with_registry_name("internal"),
                with_name("fetch"),
                with_version("1.0.0"),
            ])
            .await
            .unwrap();
        let page = service.list_servers(Vec::new()).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn test_skill_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _store) = store_backed_service(&temp_dir).await;

        let err = service
            .publish_skill_version(
                SkillEntry::new("", "review", "1.0.0", "Reviews code"),
                vec![with_registry_name("internal")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "namespace is required");

        for (ns, version) in [("acme", "1.0.0"), ("acme", "1.1.0"), ("zeta", "0.1.0")] {
            service
                .publish_skill_version(
                    SkillEntry::new(ns, "review", version, "Reviews code"),
                    vec![with_registry_name("internal")],
                )
                .await
                .unwrap();
        }

        let page = service
            .list_skills(vec![with_namespace("acme"), with_limit(1)])
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(
            decode_cursor(&page.next_cursor).unwrap(),
            Cursor::new("acme/internal.review", "1.0.0")
        );

        let next = service
            .list_skills(vec![with_namespace("acme"), with_cursor(page.next_cursor)])
            .await
            .unwrap();
        assert_eq!(next.entries.len(), 1);
        assert_eq!(next.entries[0].version, "1.1.0");
        assert!(!next.has_more());

        let latest = service
            .get_skill_version(vec![
                with_registry_name("internal"),
                with_namespace("acme"),
                with_name("review"),
                with_version("latest"),
            ])
            .await
            .unwrap();
        assert_eq!(latest.version, "1.1.0");

        service
            .delete_skill_version(vec![
                with_registry_name("internal"),
                with_namespace("zeta"),
                with_name("review"),
                with_version("0.1.0"),
            ])
            .await
            .unwrap();
        let versions = service
            .list_skill_versions(vec![with_namespace("zeta"), with_name("internal.review")])
            .await;
        assert!(matches!(versions, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_registry_administration() {
        let temp_dir = TempDir::new().unwrap();
        let (service, _store) = store_backed_service(&temp_dir).await;

        let definition = RegistryDefinition {
            name: "team".to_string(),
            managed: Some(crate::model::ManagedSource {}),
            ..Default::default()
        };
        let created = service.create_registry(&definition).await.unwrap();
        assert_eq!(created.creation_type, CreationType::Api);

        let err = service.create_registry(&definition).await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryAlreadyExists { .. }));

        let to_git = RegistryDefinition {
            name: "team".to_string(),
            git: Some(crate::model::GitSource {
                repository: "https://github.com/acme/registry.git".to_string(),
                branch: None,
                path: "registry.json".to_string(),
            }),
            sync_policy: Some(crate::model::SyncPolicy { interval_secs: 60 }),
            ..Default::default()
        };
        let err = service.update_registry("team", &to_git).await.unwrap_err();
        assert!(matches!(err, RegistryError::SourceTypeChangeNotAllowed { .. }));

        let err = service.delete_registry("upstream").await.unwrap_err();
        assert!(matches!(err, RegistryError::ConfigRegistry { .. }));
        let err = service.update_registry("upstream", &to_git).await.unwrap_err();
        assert!(matches!(err, RegistryError::ConfigRegistry { .. }));

        // new registry is visible to reads right away
        let page = service
            .list_servers(vec![with_registry_name("team")])
            .await
            .unwrap();
        assert!(page.entries.is_empty());

        service.delete_registry("team").await.unwrap();
        let err = service.get_registry("team").await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn CatalogStore> = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        let config = ServiceConfig {
            read_only: true,
            ..ServiceConfig::default()
        };
        let service = RegistryService::new(
            Arc::clone(&store),
            CountingProvider::new(CatalogSnapshot::default()),
            config,
        )
        .await
        .unwrap();

        let err = service
            .publish_server_version(
                ServerEntry::new("fetch", "1.0.0", "d"),
                vec![with_registry_name("internal")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotImplemented { .. }));
        assert_eq!(err.http_status(), 500);
    }
}
