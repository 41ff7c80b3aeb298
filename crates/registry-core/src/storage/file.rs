//! File-backed catalog store.
//!
//! Layout under the base directory:
//! - `registries.json`: every registry record, keyed by name
//! - `catalog/<registry>.json`: the entries of one registry

use super::atomic::{read_json, remove_file, write_json};
use super::CatalogStore;
use crate::config::PathsConfig;
use crate::error::{RegistryError, Result};
use crate::model::{
    recompute_latest, CatalogEntry, Registry, RegistryCatalog, ServerEntry, SkillEntry, SyncStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

type RegistryMap = BTreeMap<String, Registry>;

/// Catalog store persisting JSON documents with atomic replace.
///
/// Reads take no lock; every read-modify-write cycle holds `write_lock`.
pub struct FileCatalogStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCatalogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let catalog_dir = base_dir.join(PathsConfig::CATALOG_DIR_NAME);
        std::fs::create_dir_all(&catalog_dir)
            .map_err(|e| RegistryError::io_with_path(e, &catalog_dir))?;
        info!("Opened file catalog store at {}", base_dir.display());
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn registries_path(&self) -> PathBuf {
        self.base_dir.join(PathsConfig::REGISTRIES_FILE)
    }

    fn catalog_path(&self, registry: &str) -> PathBuf {
        self.base_dir
            .join(PathsConfig::CATALOG_DIR_NAME)
            .join(format!("{}.json", registry))
    }

    fn read_registries(&self) -> Result<RegistryMap> {
        Ok(read_json(&self.registries_path())?.unwrap_or_default())
    }

    fn write_registries(&self, registries: &RegistryMap) -> Result<()> {
        write_json(&self.registries_path(), registries, true)
    }

    fn write_catalog(&self, registry: &str, catalog: &RegistryCatalog) -> Result<()> {
        write_json(&self.catalog_path(registry), catalog, false)
    }

    fn read_catalog(&self, registry: &str) -> Result<RegistryCatalog> {
        if !self.read_registries()?.contains_key(registry) {
            return Err(RegistryError::RegistryNotFound {
                name: registry.to_string(),
            });
        }
        Ok(read_json(&self.catalog_path(registry))?.unwrap_or_default())
    }

    /// Run a read-modify-write cycle on one registry's catalog.
    fn modify_catalog<T>(
        &self,
        registry: &str,
        f: impl FnOnce(&mut RegistryCatalog) -> Result<T>,
    ) -> Result<T> {
        let _lock = self.write_lock.lock().map_err(|_| {
            RegistryError::database("failed to acquire write lock for catalog")
        })?;

        let mut catalog = self.read_catalog(registry)?;
        let out = f(&mut catalog)?;
        self.write_catalog(registry, &catalog)?;
        Ok(out)
    }

    fn modify_registries<T>(&self, f: impl FnOnce(&mut RegistryMap) -> Result<T>) -> Result<T> {
        let _lock = self.write_lock.lock().map_err(|_| {
            RegistryError::database("failed to acquire write lock for registries")
        })?;

        let mut registries = self.read_registries()?;
        let out = f(&mut registries)?;
        self.write_registries(&registries)?;
        Ok(out)
    }

    fn delete_registry_sync(&self, name: &str) -> Result<bool> {
        let _lock = self.write_lock.lock().map_err(|_| {
            RegistryError::database("failed to acquire write lock for registries")
        })?;

        let mut registries = self.read_registries()?;
        if registries.remove(name).is_none() {
            return Ok(false);
        }
        self.write_registries(&registries)?;
        remove_file(&self.catalog_path(name))?;
        debug!("Deleted registry {} and its catalog", name);
        Ok(true)
    }
}

fn insert_entry<T: CatalogEntry>(entries: &mut Vec<T>, entry: T) -> Result<T> {
    let duplicate = entries.iter().any(|e| {
        e.namespace() == entry.namespace() && e.name() == entry.name() && e.version() == entry.version()
    });
    if duplicate {
        return Err(RegistryError::VersionAlreadyExists {
            name: entry.cursor_name(),
            version: entry.version().to_string(),
        });
    }

    let key = (entry.namespace().map(String::from), entry.name().to_string(), entry.version().to_string());
    entries.push(entry);
    recompute_latest(entries);

    entries
        .iter()
        .find(|e| {
            e.namespace().map(String::from) == key.0 && e.name() == key.1 && e.version() == key.2
        })
        .cloned()
        .ok_or_else(|| RegistryError::database("inserted entry vanished"))
}

fn remove_entry<T: CatalogEntry>(
    entries: &mut Vec<T>,
    namespace: Option<&str>,
    name: &str,
    version: &str,
) -> Result<()> {
    let before = entries.len();
    entries.retain(|e| !(e.namespace() == namespace && e.name() == name && e.version() == version));
    if entries.len() == before {
        let what = match namespace {
            Some(ns) => format!("{}/{} version {}", ns, name, version),
            None => format!("{} version {}", name, version),
        };
        return Err(RegistryError::NotFound { what });
    }
    recompute_latest(entries);
    Ok(())
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn list_registries(&self) -> Result<Vec<Registry>> {
        Ok(self.read_registries()?.into_values().collect())
    }

    async fn get_registry(&self, name: &str) -> Result<Option<Registry>> {
        Ok(self.read_registries()?.remove(name))
    }

    async fn insert_registry(&self, registry: &Registry) -> Result<()> {
        self.modify_registries(|registries| {
            if registries.contains_key(&registry.name) {
                return Err(RegistryError::RegistryAlreadyExists {
                    name: registry.name.clone(),
                });
            }
            registries.insert(registry.name.clone(), registry.clone());
            Ok(())
        })
    }

    async fn update_registry(&self, registry: &Registry) -> Result<()> {
        self.modify_registries(|registries| match registries.get_mut(&registry.name) {
            Some(existing) => {
                *existing = registry.clone();
                Ok(())
            }
            None => Err(RegistryError::RegistryNotFound {
                name: registry.name.clone(),
            }),
        })
    }

    async fn delete_registry(&self, name: &str) -> Result<bool> {
        self.delete_registry_sync(name)
    }

    async fn update_sync_status(&self, name: &str, status: &SyncStatus) -> Result<()> {
        self.modify_registries(|registries| match registries.get_mut(name) {
            Some(existing) => {
                existing.sync_status = status.clone();
                Ok(())
            }
            None => Err(RegistryError::RegistryNotFound {
                name: name.to_string(),
            }),
        })
    }

    async fn load_catalog(&self, registry: &str) -> Result<RegistryCatalog> {
        self.read_catalog(registry)
    }

    async fn replace_catalog(&self, registry: &str, mut catalog: RegistryCatalog) -> Result<()> {
        recompute_latest(&mut catalog.servers);
        recompute_latest(&mut catalog.skills);
        self.modify_catalog(registry, move |current| {
            *current = catalog;
            Ok(())
        })
    }

    async fn insert_server(&self, registry: &str, mut entry: ServerEntry) -> Result<ServerEntry> {
        entry.updated_at = Utc::now();
        self.modify_catalog(registry, |catalog| insert_entry(&mut catalog.servers, entry))
    }

    async fn delete_server(&self, registry: &str, name: &str, version: &str) -> Result<()> {
        self.modify_catalog(registry, |catalog| {
            remove_entry(&mut catalog.servers, None, name, version)
        })
    }

    async fn insert_skill(&self, registry: &str, mut entry: SkillEntry) -> Result<SkillEntry> {
        entry.updated_at = Utc::now();
        self.modify_catalog(registry, |catalog| insert_entry(&mut catalog.skills, entry))
    }

    async fn delete_skill(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        self.modify_catalog(registry, |catalog| {
            remove_entry(&mut catalog.skills, Some(namespace), name, version)
        })
    }

    async fn close(&self) {}
}
