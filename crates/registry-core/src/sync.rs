//! Sync bookkeeping and the write path for synced registry data.
//!
//! The core never schedules work itself. An external driver asks
//! [`SyncStateTracker::is_sync_due`], fetches upstream data, hands it to
//! [`SyncWriter::store`], and records the outcome on the tracker.

use crate::config::RegistryConfigFile;
use crate::error::{RegistryError, Result};
use crate::model::{
    recompute_latest, CatalogEntry, CreationType, Registry, RegistryCatalog, SyncPhase, SyncStatus,
};
use crate::storage::CatalogStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sync status of one registry, as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySyncState {
    pub registry: String,
    pub source_type: &'static str,
    pub status: SyncStatus,
}

/// Outcome of reconciling the configuration file with stored registries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Whether a registry needs a sync at `now`.
///
/// Self-contained sources never do. Otherwise a sync is due when none was
/// ever attempted, when the last attempt failed, or when the policy interval
/// has elapsed since the last success.
pub fn sync_due(registry: &Registry, now: DateTime<Utc>) -> bool {
    if registry.source.is_self_contained() {
        return false;
    }

    let status = &registry.sync_status;
    if status.last_attempt.is_none() || status.phase == SyncPhase::Failed {
        return true;
    }

    let Some(policy) = registry.sync_policy else {
        return false;
    };
    match status.last_success {
        None => true,
        Some(last) => {
            let interval = chrono::Duration::seconds(policy.interval_secs as i64);
            now.signed_duration_since(last) >= interval
        }
    }
}

/// Reads and updates per-registry sync status.
pub struct SyncStateTracker {
    store: Arc<dyn CatalogStore>,
}

impl SyncStateTracker {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    async fn registry(&self, name: &str) -> Result<Registry> {
        self.store
            .get_registry(name)
            .await?
            .ok_or_else(|| RegistryError::RegistryNotFound {
                name: name.to_string(),
            })
    }

    pub async fn list_statuses(&self) -> Result<Vec<RegistrySyncState>> {
        Ok(self
            .store
            .list_registries()
            .await?
            .into_iter()
            .map(|r| RegistrySyncState {
                source_type: r.source_type(),
                registry: r.name,
                status: r.sync_status,
            })
            .collect())
    }

    pub async fn get_status(&self, registry: &str) -> Result<SyncStatus> {
        Ok(self.registry(registry).await?.sync_status)
    }

    /// Mark a sync as started.
    pub async fn begin_attempt(&self, registry: &str) -> Result<SyncStatus> {
        let mut status = self.get_status(registry).await?;
        status.phase = SyncPhase::Syncing;
        status.last_attempt = Some(Utc::now());
        status.attempt_count += 1;
        self.store.update_sync_status(registry, &status).await?;
        debug!("Sync attempt {} started for {}", status.attempt_count, registry);
        Ok(status)
    }

    /// Mark the current sync as complete. Resets the attempt counter.
    pub async fn record_success(&self, registry: &str, entry_count: usize) -> Result<SyncStatus> {
        let mut status = self.get_status(registry).await?;
        let now = Utc::now();
        status.phase = SyncPhase::Complete;
        status.last_success = Some(now);
        status.last_attempt.get_or_insert(now);
        status.attempt_count = 0;
        status.entry_count = entry_count;
        status.message = None;
        self.store.update_sync_status(registry, &status).await?;
        info!("Sync of {} complete with {} entries", registry, entry_count);
        Ok(status)
    }

    /// Mark the current sync as failed. Previously stored entries stay.
    pub async fn record_failure(
        &self,
        registry: &str,
        message: impl Into<String>,
    ) -> Result<SyncStatus> {
        let mut status = self.get_status(registry).await?;
        let message = message.into();
        status.phase = SyncPhase::Failed;
        status.last_attempt.get_or_insert_with(Utc::now);
        warn!("Sync of {} failed: {}", registry, message);
        status.message = Some(message);
        self.store.update_sync_status(registry, &status).await?;
        Ok(status)
    }

    pub async fn is_sync_due(&self, registry: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(sync_due(&self.registry(registry).await?, now))
    }

    /// Upsert every CONFIG registry from the configuration file and remove
    /// CONFIG registries it no longer lists. API registries are never touched;
    /// a configured name that collides with one is an error.
    pub async fn reconcile_config(&self, config: &RegistryConfigFile) -> Result<ConfigReconcileReport> {
        let desired = config.config_registries()?;
        let mut report = ConfigReconcileReport::default();

        for registry in &desired {
            match self.store.get_registry(&registry.name).await? {
                Some(existing) if existing.creation_type == CreationType::Api => {
                    return Err(RegistryError::RegistryAlreadyExists {
                        name: registry.name.clone(),
                    });
                }
                Some(existing) => {
                    let mut updated = registry.clone();
                    updated.created_at = existing.created_at;
                    updated.sync_status = existing.sync_status;
                    if updated.source != existing.source
                        || updated.filter != existing.filter
                        || updated.sync_policy != existing.sync_policy
                        || updated.format != existing.format
                    {
                        self.store.update_registry(&updated).await?;
                        report.updated += 1;
                    }
                }
                None => {
                    self.store.insert_registry(registry).await?;
                    report.inserted += 1;
                }
            }
        }

        let wanted: HashSet<&str> = desired.iter().map(|r| r.name.as_str()).collect();
        for existing in self.store.list_registries().await? {
            if existing.creation_type == CreationType::Config && !wanted.contains(existing.name.as_str()) {
                self.store.delete_registry(&existing.name).await?;
                report.removed += 1;
            }
        }

        info!(
            "Reconciled configuration registries: {} inserted, {} updated, {} removed",
            report.inserted, report.updated, report.removed
        );
        Ok(report)
    }
}

/// Writes synced upstream data into the store.
pub struct SyncWriter {
    store: Arc<dyn CatalogStore>,
}

impl SyncWriter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Filter, de-duplicate and store a registry's synced entries, replacing
    /// whatever it held before. Returns the number of stored entries.
    pub async fn store(&self, registry: &str, mut catalog: RegistryCatalog) -> Result<usize> {
        let record = self
            .store
            .get_registry(registry)
            .await?
            .ok_or_else(|| RegistryError::RegistryNotFound {
                name: registry.to_string(),
            })?;
        if record.is_managed() {
            return Err(RegistryError::InvalidRegistryConfig {
                message: format!(
                    "registry '{}' is managed and cannot receive synced data",
                    registry
                ),
            });
        }

        let received = catalog.entry_count();
        drop_invalid(registry, &mut catalog.servers);
        drop_invalid(registry, &mut catalog.skills);
        if let Some(filter) = &record.filter {
            catalog.servers.retain(|e| filter.allows(&e.name, &e.tags));
            catalog.skills.retain(|e| filter.allows(&e.name, &e.tags));
        }
        dedupe(&mut catalog.servers);
        dedupe(&mut catalog.skills);
        recompute_latest(&mut catalog.servers);
        recompute_latest(&mut catalog.skills);

        let stored = catalog.entry_count();
        self.store.replace_catalog(registry, catalog).await?;
        debug!(
            "Stored {} of {} synced entries for {}",
            stored, received, registry
        );
        Ok(stored)
    }
}

/// Drop entries that could never be published, such as a stored `latest`
/// version or a name that breaks cursor encoding.
pub(crate) fn drop_invalid<T: CatalogEntry>(registry: &str, entries: &mut Vec<T>) {
    entries.retain(|entry| match entry.validate_for_publish() {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Skipping synced entry {}@{} for {}: {}",
                entry.cursor_name(),
                entry.version(),
                registry,
                e
            );
            false
        }
    });
}

/// Keep the last occurrence of each (namespace, name, version).
fn dedupe<T: CatalogEntry>(entries: &mut Vec<T>) {
    let mut seen = HashSet::new();
    let mut kept: Vec<T> = entries
        .drain(..)
        .rev()
        .filter(|e| {
            seen.insert((
                e.namespace().map(String::from),
                e.name().to_string(),
                e.version().to_string(),
            ))
        })
        .collect();
    kept.reverse();
    *entries = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterRules, PatternFilter, ServerEntry, SkillEntry};
    use crate::storage::test_support::{git_registry, managed_registry};
    use crate::storage::FileCatalogStore;
    use tempfile::TempDir;

    fn file_store(temp_dir: &TempDir) -> Arc<dyn CatalogStore> {
        Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap())
    }

    #[test]
    fn test_sync_due_rules() {
        let now = Utc::now();
        let mut registry = git_registry("upstream");
        assert!(sync_due(&registry, now), "never attempted");

        registry.sync_status.last_attempt = Some(now);
        registry.sync_status.last_success = Some(now);
        registry.sync_status.phase = SyncPhase::Complete;
        assert!(!sync_due(&registry, now));
        assert!(sync_due(&registry, now + chrono::Duration::seconds(600)));

        registry.sync_status.phase = SyncPhase::Failed;
        assert!(sync_due(&registry, now), "last attempt failed");

        assert!(!sync_due(&managed_registry("internal"), now));
    }

    #[tokio::test]
    async fn test_tracker_attempt_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.insert_registry(&git_registry("upstream")).await.unwrap();
        let tracker = SyncStateTracker::new(store);

        let status = tracker.begin_attempt("upstream").await.unwrap();
        assert_eq!(status.phase, SyncPhase::Syncing);
        assert_eq!(status.attempt_count, 1);

        let status = tracker.record_failure("upstream", "clone failed").await.unwrap();
        assert_eq!(status.phase, SyncPhase::Failed);
        assert_eq!(status.message.as_deref(), Some("clone failed"));
        assert!(tracker.is_sync_due("upstream", Utc::now()).await.unwrap());

        tracker.begin_attempt("upstream").await.unwrap();
        let status = tracker.record_success("upstream", 12).await.unwrap();
        assert_eq!(status.phase, SyncPhase::Complete);
        assert_eq!(status.entry_count, 12);
        assert_eq!(status.attempt_count, 0);
        assert!(status.message.is_none());
        assert!(!tracker.is_sync_due("upstream", Utc::now()).await.unwrap());

        let statuses = tracker.list_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].source_type, "git");

        let err = tracker.get_status("missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_writer_applies_filter_and_latest() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        let mut registry = git_registry("upstream");
        registry.filter = Some(FilterRules {
            names: PatternFilter {
                include: Vec::new(),
                exclude: vec!["*-internal".to_string()],
            },
            tags: PatternFilter::default(),
        });
        store.insert_registry(&registry).await.unwrap();

        let catalog = RegistryCatalog {
            servers: vec![
                ServerEntry::new("fetch", "1.0.0", "d"),
                ServerEntry::new("fetch", "2.0.0", "d"),
                ServerEntry::new("fetch", "2.0.0", "dup"),
                ServerEntry::new("fetch-internal", "1.0.0", "d"),
            ],
            skills: vec![SkillEntry::new("acme", "review", "1.0.0", "d")],
        };

        let writer = SyncWriter::new(Arc::clone(&store));
        assert_eq!(writer.store("upstream", catalog).await.unwrap(), 3);

        let stored = store.load_catalog("upstream").await.unwrap();
        assert_eq!(stored.servers.len(), 2);
        let latest = stored.servers.iter().find(|s| s.is_latest).unwrap();
        assert_eq!(latest.version, "2.0.0");
        assert_eq!(latest.description, "dup");
    }

    #[tokio::test]
    async fn test_writer_skips_unpublishable_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.insert_registry(&git_registry("upstream")).await.unwrap();

        let catalog = RegistryCatalog {
            servers: vec![
                ServerEntry::new("fetch", "latest", "d"),
                ServerEntry::new("a,b", "1.0.0", "d"),
                ServerEntry::new("fetch", "1.0,1", "d"),
                ServerEntry::new("fetch", "1.0.0", ""),
                ServerEntry::new("z", "1.0.0", "d"),
            ],
            skills: vec![
                SkillEntry::new("acme/tools", "review", "1.0.0", "d"),
                SkillEntry::new("acme", "review", "1.0.0", "d"),
            ],
        };

        let writer = SyncWriter::new(Arc::clone(&store));
        assert_eq!(writer.store("upstream", catalog).await.unwrap(), 2);

        let stored = store.load_catalog("upstream").await.unwrap();
        let servers: Vec<(&str, &str)> = stored
            .servers
            .iter()
            .map(|s| (s.name.as_str(), s.version.as_str()))
            .collect();
        assert_eq!(servers, vec![("z", "1.0.0")]);
        assert_eq!(stored.skills.len(), 1);
        assert_eq!(stored.skills[0].namespace, "acme");
    }

    #[tokio::test]
    async fn test_writer_rejects_managed_and_unknown() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        let writer = SyncWriter::new(store);

        let err = writer
            .store("internal", RegistryCatalog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRegistryConfig { .. }));

        let err = writer
            .store("missing", RegistryCatalog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_config() {
        let temp_dir = TempDir::new().unwrap();
        let store = file_store(&temp_dir);
        store.insert_registry(&git_registry("stale")).await.unwrap();
        let tracker = SyncStateTracker::new(Arc::clone(&store));

        let config = RegistryConfigFile::from_json(
            r#"{"registries": [
                {"name": "internal", "managed": {}},
                {"name": "inline", "file": {"data": "{}"}}
            ]}"#,
        )
        .unwrap();
        let report = tracker.reconcile_config(&config).await.unwrap();
        assert_eq!(
            report,
            ConfigReconcileReport {
                inserted: 2,
                updated: 0,
                removed: 1
            }
        );

        // unchanged definitions are left alone
        let report = tracker.reconcile_config(&config).await.unwrap();
        assert_eq!(report, ConfigReconcileReport::default());

        let mut api = managed_registry("api-owned");
        api.creation_type = CreationType::Api;
        store.insert_registry(&api).await.unwrap();
        let clash = RegistryConfigFile::from_json(
            r#"{"registries": [{"name": "api-owned", "managed": {}}]}"#,
        )
        .unwrap();
        let err = tracker.reconcile_config(&clash).await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryAlreadyExists { .. }));
    }
}
