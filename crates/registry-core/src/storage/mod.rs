//! Persistence layer for registries and their catalog entries.
//!
//! Two interchangeable backends implement [`CatalogStore`]:
//! - [`FileCatalogStore`]: atomic JSON files under a base directory
//! - [`SqliteCatalogStore`]: SQLite behind a bounded connection pool
//!
//! [`factory`] selects one from configuration and assembles the components
//! built on top of it.

pub(crate) mod atomic;
pub mod factory;
mod file;
mod sqlite;

pub use factory::{
    build_components, build_components_with_provider, create_factory, DatabaseStorageFactory,
    FileStorageFactory, StorageBackend, StorageComponents, StorageFactory, Teardown,
};
pub use file::FileCatalogStore;
pub use sqlite::SqliteCatalogStore;

use crate::error::Result;
use crate::model::{Registry, RegistryCatalog, ServerEntry, SkillEntry, SyncStatus};
use async_trait::async_trait;

/// Backend-neutral store of registry records and catalog entries.
///
/// Entry mutations recompute the latest-version flags of the affected
/// (namespace, name) group before they return.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Short backend identifier used in logs.
    fn backend_name(&self) -> &'static str;

    // Registry records

    async fn list_registries(&self) -> Result<Vec<Registry>>;

    async fn get_registry(&self, name: &str) -> Result<Option<Registry>>;

    /// Fails with `RegistryAlreadyExists` if the name is taken.
    async fn insert_registry(&self, registry: &Registry) -> Result<()>;

    /// Replaces the definition of an existing registry. Fails with
    /// `RegistryNotFound` if it does not exist.
    async fn update_registry(&self, registry: &Registry) -> Result<()>;

    /// Deletes the registry and every entry it owns. Returns whether a
    /// registry was removed.
    async fn delete_registry(&self, name: &str) -> Result<bool>;

    async fn update_sync_status(&self, name: &str, status: &SyncStatus) -> Result<()>;

    // Catalog entries

    /// Entries of one registry. Unknown registries yield `RegistryNotFound`.
    async fn load_catalog(&self, registry: &str) -> Result<RegistryCatalog>;

    /// Replace every entry of a registry in one step.
    async fn replace_catalog(&self, registry: &str, catalog: RegistryCatalog) -> Result<()>;

    /// Insert a new server version. Fails with `VersionAlreadyExists` on a
    /// duplicate (name, version). Returns the stored entry.
    async fn insert_server(&self, registry: &str, entry: ServerEntry) -> Result<ServerEntry>;

    /// Fails with `NotFound` if the version does not exist.
    async fn delete_server(&self, registry: &str, name: &str, version: &str) -> Result<()>;

    async fn insert_skill(&self, registry: &str, entry: SkillEntry) -> Result<SkillEntry>;

    async fn delete_skill(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<()>;

    /// Release backend resources. Safe to call more than once.
    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::RegistryError;
    use crate::model::{CreationType, GitSource, ManagedSource, RegistryDefinition, SyncPolicy};

    pub fn managed_registry(name: &str) -> Registry {
        RegistryDefinition {
            name: name.to_string(),
            managed: Some(ManagedSource {}),
            ..Default::default()
        }
        .to_registry(CreationType::Api)
        .unwrap()
    }

    pub fn git_registry(name: &str) -> Registry {
        RegistryDefinition {
            name: name.to_string(),
            git: Some(GitSource {
                repository: "https://github.com/acme/registry.git".to_string(),
                branch: None,
                path: "registry.json".to_string(),
            }),
            sync_policy: Some(SyncPolicy { interval_secs: 600 }),
            ..Default::default()
        }
        .to_registry(CreationType::Config)
        .unwrap()
    }

    /// Behavior every backend must share.
    pub async fn exercise_store(store: &dyn CatalogStore) {
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        store.insert_registry(&git_registry("upstream")).await.unwrap();

        let err = store
            .insert_registry(&managed_registry("internal"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryAlreadyExists { .. }));

        let names: Vec<String> = store
            .list_registries()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["internal", "upstream"]);

        // latest flag follows semver
        store
            .insert_server("internal", ServerEntry::new("fetch", "1.9.0", "d"))
            .await
            .unwrap();
        store
            .insert_server("internal", ServerEntry::new("fetch", "1.10.0", "d"))
            .await
            .unwrap();
        let catalog = store.load_catalog("internal").await.unwrap();
        let latest: Vec<&str> = catalog
            .servers
            .iter()
            .filter(|s| s.is_latest)
            .map(|s| s.version.as_str())
            .collect();
        assert_eq!(latest, vec!["1.10.0"]);

        let err = store
            .insert_server("internal", ServerEntry::new("fetch", "1.9.0", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::VersionAlreadyExists { .. }));

        store.delete_server("internal", "fetch", "1.10.0").await.unwrap();
        let catalog = store.load_catalog("internal").await.unwrap();
        assert_eq!(catalog.servers.len(), 1);
        assert!(catalog.servers[0].is_latest);

        let err = store
            .delete_server("internal", "fetch", "9.9.9")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));

        // skills are keyed by namespace too
        store
            .insert_skill("internal", SkillEntry::new("acme", "review", "1.0.0", "d"))
            .await
            .unwrap();
        store
            .insert_skill("internal", SkillEntry::new("other", "review", "1.0.0", "d"))
            .await
            .unwrap();
        let catalog = store.load_catalog("internal").await.unwrap();
        assert_eq!(catalog.skills.len(), 2);
        assert!(catalog.skills.iter().all(|s| s.is_latest));
        store
            .delete_skill("internal", "acme", "review", "1.0.0")
            .await
            .unwrap();

        // replace is all-or-nothing per registry
        let replacement = RegistryCatalog {
            servers: vec![ServerEntry::new("a", "1.0.0", "d"), ServerEntry::new("b", "1.0.0", "d")],
            skills: Vec::new(),
        };
        store.replace_catalog("upstream", replacement).await.unwrap();
        assert_eq!(store.load_catalog("upstream").await.unwrap().servers.len(), 2);

        let status = SyncStatus {
            entry_count: 2,
            attempt_count: 1,
            ..Default::default()
        };
        store.update_sync_status("upstream", &status).await.unwrap();
        let upstream = store.get_registry("upstream").await.unwrap().unwrap();
        assert_eq!(upstream.sync_status.entry_count, 2);

        assert!(store.delete_registry("upstream").await.unwrap());
        assert!(!store.delete_registry("upstream").await.unwrap());
        let err = store.load_catalog("upstream").await.unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));

        let err = store
            .insert_server("missing", ServerEntry::new("x", "1.0.0", "d"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound { .. }));
    }

    fn latest_versions(servers: &[ServerEntry]) -> Vec<&str> {
        servers
            .iter()
            .filter(|s| s.is_latest)
            .map(|s| s.version.as_str())
            .collect()
    }

    /// Mixed semver and free-form versions resolve to the most recent update,
    /// however the entries arrive.
    pub async fn exercise_latest_selection(store: &dyn CatalogStore) {
        store.insert_registry(&managed_registry("internal")).await.unwrap();
        store.insert_registry(&git_registry("upstream")).await.unwrap();

        for version in ["2.0.0", "nightly", "1.0.0"] {
            store
                .insert_server("internal", ServerEntry::new("fetch", version, "d"))
                .await
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let catalog = store.load_catalog("internal").await.unwrap();
        assert_eq!(latest_versions(&catalog.servers), vec!["1.0.0"]);

        store.delete_server("internal", "fetch", "1.0.0").await.unwrap();
        let catalog = store.load_catalog("internal").await.unwrap();
        assert_eq!(latest_versions(&catalog.servers), vec!["nightly"]);

        let now = chrono::Utc::now();
        let dated = |version: &str, days_ago: i64| {
            let mut entry = ServerEntry::new("sync", version, "d");
            entry.updated_at = now - chrono::Duration::days(days_ago);
            entry
        };
        for servers in [
            vec![dated("1.0.0", 0), dated("2.0.0", 2), dated("nightly", 1)],
            vec![dated("nightly", 1), dated("2.0.0", 2), dated("1.0.0", 0)],
        ] {
            let replacement = RegistryCatalog {
                servers,
                skills: Vec::new(),
            };
            store.replace_catalog("upstream", replacement).await.unwrap();
            let catalog = store.load_catalog("upstream").await.unwrap();
            assert_eq!(latest_versions(&catalog.servers), vec!["1.0.0"]);
        }
    }
}
