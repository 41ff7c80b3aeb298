//! Sources of catalog snapshots for the read-facing service.

use crate::error::{RegistryError, Result};
use crate::model::{recompute_latest, CatalogSnapshot, RegistryCatalog};
use crate::storage::CatalogStore;
use crate::sync::drop_invalid;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Produces a full snapshot of every registry's entries.
#[async_trait]
pub trait RegistryDataProvider: Send + Sync {
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot>;

    /// Identifier used in logs and provider errors.
    fn name(&self) -> &str;
}

/// Reads every registry from a catalog store.
pub struct StoreDataProvider {
    store: Arc<dyn CatalogStore>,
}

impl StoreDataProvider {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RegistryDataProvider for StoreDataProvider {
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot> {
        let mut snapshot = CatalogSnapshot::default();
        for registry in self.store.list_registries().await? {
            let catalog = self.store.load_catalog(&registry.name).await?;
            snapshot.registries.insert(registry.name, catalog);
        }
        debug!(
            "Fetched {} entries across {} registries from {} store",
            snapshot.entry_count(),
            snapshot.registries.len(),
            self.store.backend_name()
        );
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "store"
    }
}

/// Reads one `<registry>.json` catalog file per registry from a directory.
///
/// Latest flags are recomputed on load and entries that could not be
/// published are skipped. A single malformed file fails the whole fetch.
pub struct DirectoryDataProvider {
    dir: PathBuf,
}

impl DirectoryDataProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn provider_error(&self, message: String) -> RegistryError {
        RegistryError::Provider {
            provider: self.name().to_string(),
            message,
        }
    }

    fn read_snapshot(&self) -> Result<CatalogSnapshot> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            self.provider_error(format!("failed to read {}: {}", self.dir.display(), e))
        })?;

        let mut snapshot = CatalogSnapshot::default();
        for entry in entries {
            let path = entry
                .map_err(|e| self.provider_error(format!("failed to list directory: {}", e)))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(registry) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let contents = std::fs::read_to_string(&path).map_err(|e| {
                self.provider_error(format!("failed to read {}: {}", path.display(), e))
            })?;
            let mut catalog: RegistryCatalog = serde_json::from_str(&contents).map_err(|e| {
                self.provider_error(format!("malformed catalog {}: {}", path.display(), e))
            })?;
            drop_invalid(registry, &mut catalog.servers);
            drop_invalid(registry, &mut catalog.skills);
            recompute_latest(&mut catalog.servers);
            recompute_latest(&mut catalog.skills);
            snapshot.registries.insert(registry.to_string(), catalog);
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl RegistryDataProvider for DirectoryDataProvider {
    async fn fetch_catalog(&self) -> Result<CatalogSnapshot> {
        let snapshot = self.read_snapshot()?;
        debug!(
            "Loaded {} registries from {}",
            snapshot.registries.len(),
            self.dir.display()
        );
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerEntry;
    use crate::storage::test_support::managed_registry;
    use crate::storage::FileCatalogStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_provider_collects_every_registry() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileCatalogStore::new(temp_dir.path()).unwrap());
        store.insert_registry(&managed_registry("a")).await.unwrap();
        store.insert_registry(&managed_registry("b")).await.unwrap();
        store
            .insert_server("a", ServerEntry::new("s", "1.0.0", "d"))
            .await
            .unwrap();

        let provider = StoreDataProvider::new(store);
        let snapshot = provider.fetch_catalog().await.unwrap();
        assert_eq!(snapshot.registries.len(), 2);
        assert_eq!(snapshot.entry_count(), 1);
        assert!(snapshot.get("b").unwrap().servers.is_empty());
    }

    #[tokio::test]
    async fn test_directory_provider_uses_file_stem_as_registry() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = RegistryCatalog {
            servers: vec![
                ServerEntry::new("fetch", "1.0.0", "Fetches URLs"),
                ServerEntry::new("fetch", "latest", "Fetches URLs"),
                ServerEntry::new("a,b", "1.0.0", "Breaks cursors"),
            ],
            skills: Vec::new(),
        };
        std::fs::write(
            temp_dir.path().join("upstream.json"),
            serde_json::to_string(&catalog).unwrap(),
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("README.md"), "ignored").unwrap();

        let provider = DirectoryDataProvider::new(temp_dir.path());
        let snapshot = provider.fetch_catalog().await.unwrap();
        assert_eq!(snapshot.registries.len(), 1);
        let servers = &snapshot.get("upstream").unwrap().servers;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "fetch");
        assert_eq!(servers[0].version, "1.0.0");
        assert!(servers[0].is_latest);
    }

    #[tokio::test]
    async fn test_directory_provider_fails_on_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("good.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("bad.json"), "{not json").unwrap();

        let provider = DirectoryDataProvider::new(temp_dir.path());
        let err = provider.fetch_catalog().await.unwrap_err();
        assert!(matches!(err, RegistryError::Provider { .. }));
    }

    #[tokio::test]
    async fn test_directory_provider_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let provider = DirectoryDataProvider::new(temp_dir.path().join("missing"));
        assert!(provider.fetch_catalog().await.is_err());
    }
}
