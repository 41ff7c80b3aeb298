//! Backend selection and component assembly.
//!
//! A [`StorageFactory`] owns one backend store and hands it to every
//! component it creates. [`build_components`] picks the factory from a
//! [`StorageBackend`], builds the full component family, and returns it with a
//! single teardown handle.

use super::{CatalogStore, FileCatalogStore, SqliteCatalogStore};
use crate::config::{DatabaseConfig, FileStorageConfig, StorageConfig, StorageKind};
use crate::error::{RegistryError, Result};
use crate::provider::{RegistryDataProvider, StoreDataProvider};
use crate::service::{RegistryService, ServiceConfig};
use crate::sync::{SyncStateTracker, SyncWriter};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Which backend to build.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    File(FileStorageConfig),
    /// `None` is accepted here and rejected when the factory is created.
    Database(Option<DatabaseConfig>),
}

impl StorageBackend {
    /// Resolve the backend from the configuration file's storage section,
    /// defaulting to a file store under `default_dir`.
    pub fn from_config(storage: Option<&StorageConfig>, default_dir: &Path) -> Self {
        match storage {
            Some(StorageConfig {
                kind: StorageKind::Database,
                database,
                ..
            }) => StorageBackend::Database(database.clone()),
            Some(StorageConfig {
                kind: StorageKind::File,
                file: Some(file),
                ..
            }) => StorageBackend::File(file.clone()),
            _ => StorageBackend::File(FileStorageConfig {
                base_dir: default_dir.to_path_buf(),
            }),
        }
    }

    pub fn kind(&self) -> StorageKind {
        match self {
            StorageBackend::File(_) => StorageKind::File,
            StorageBackend::Database(_) => StorageKind::Database,
        }
    }
}

/// Produces the component family over one shared backend store.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// The store shared by every component this factory creates.
    fn store(&self) -> Arc<dyn CatalogStore>;

    fn create_state_tracker(&self) -> SyncStateTracker {
        SyncStateTracker::new(self.store())
    }

    fn create_sync_writer(&self) -> SyncWriter {
        SyncWriter::new(self.store())
    }

    /// A service reading through a [`StoreDataProvider`] over the shared store.
    async fn create_registry_service(&self, config: ServiceConfig) -> Result<RegistryService> {
        let provider = Arc::new(StoreDataProvider::new(self.store()));
        self.create_registry_service_with(config, provider).await
    }

    /// A service reading through `provider`; mutations still go to the store.
    async fn create_registry_service_with(
        &self,
        config: ServiceConfig,
        provider: Arc<dyn RegistryDataProvider>,
    ) -> Result<RegistryService> {
        RegistryService::new(self.store(), provider, config).await
    }

    /// Release what the factory created. Idempotent.
    async fn cleanup(&self);
}

/// Factory over a [`FileCatalogStore`]. No pool; cleanup is a no-op.
pub struct FileStorageFactory {
    store: Arc<FileCatalogStore>,
}

impl FileStorageFactory {
    pub fn new(config: &FileStorageConfig) -> Result<Self> {
        if config.base_dir.as_os_str().is_empty() {
            return Err(RegistryError::Config {
                message: "file storage requires a base directory".to_string(),
            });
        }
        let store = Arc::new(FileCatalogStore::new(&config.base_dir)?);
        Ok(Self { store })
    }
}

#[async_trait]
impl StorageFactory for FileStorageFactory {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    async fn cleanup(&self) {
        debug!(
            "File storage at {} needs no teardown",
            self.store.base_dir().display()
        );
    }
}

/// Factory over a pooled [`SqliteCatalogStore`].
pub struct DatabaseStorageFactory {
    store: Arc<SqliteCatalogStore>,
    closed: AtomicBool,
}

impl DatabaseStorageFactory {
    /// Open the pool and ensure the schema. Missing configuration is an error.
    pub async fn new(config: Option<&DatabaseConfig>) -> Result<Self> {
        let config = config.ok_or_else(|| RegistryError::Config {
            message: "database storage selected without database configuration".to_string(),
        })?;
        if config.path.as_os_str().is_empty() {
            return Err(RegistryError::Config {
                message: "database storage requires a database path".to_string(),
            });
        }

        let store = Arc::new(SqliteCatalogStore::open(config).await?);
        Ok(Self {
            store,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl StorageFactory for DatabaseStorageFactory {
    fn backend_name(&self) -> &'static str {
        "database"
    }

    fn store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Database storage already torn down");
            return;
        }
        self.store.close().await;
    }
}

/// Create the factory for a backend selection.
pub async fn create_factory(backend: &StorageBackend) -> Result<Arc<dyn StorageFactory>> {
    let factory: Arc<dyn StorageFactory> = match backend {
        StorageBackend::File(config) => Arc::new(FileStorageFactory::new(config)?),
        StorageBackend::Database(config) => {
            Arc::new(DatabaseStorageFactory::new(config.as_ref()).await?)
        }
    };
    info!("Created {} storage factory", factory.backend_name());
    Ok(factory)
}

/// Idempotent teardown handle for a component family.
#[derive(Clone)]
pub struct Teardown {
    factory: Arc<dyn StorageFactory>,
}

impl Teardown {
    pub async fn run(&self) {
        self.factory.cleanup().await;
    }
}

/// Every component built over one backend, plus the handle that tears it down.
pub struct StorageComponents {
    pub state_tracker: SyncStateTracker,
    pub sync_writer: SyncWriter,
    pub registry_service: RegistryService,
    pub teardown: Teardown,
}

/// Build the component family over a store-backed provider.
pub async fn build_components(
    backend: &StorageBackend,
    service_config: ServiceConfig,
) -> Result<StorageComponents> {
    build_components_inner(backend, service_config, None).await
}

/// Build the component family with reads served by `provider`.
pub async fn build_components_with_provider(
    backend: &StorageBackend,
    service_config: ServiceConfig,
    provider: Arc<dyn RegistryDataProvider>,
) -> Result<StorageComponents> {
    build_components_inner(backend, service_config, Some(provider)).await
}

async fn build_components_inner(
    backend: &StorageBackend,
    service_config: ServiceConfig,
    provider: Option<Arc<dyn RegistryDataProvider>>,
) -> Result<StorageComponents> {
    let factory = create_factory(backend).await?;

    let service = match provider {
        Some(provider) => {
            factory
                .create_registry_service_with(service_config, provider)
                .await
        }
        None => factory.create_registry_service(service_config).await,
    };
    let registry_service = match service {
        Ok(service) => service,
        Err(e) => {
            factory.cleanup().await;
            return Err(e);
        }
    };

    Ok(StorageComponents {
        state_tracker: factory.create_state_tracker(),
        sync_writer: factory.create_sync_writer(),
        registry_service,
        teardown: Teardown { factory },
    })
}
