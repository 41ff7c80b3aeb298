//! Registry Core - aggregated, paginated catalog of MCP servers and skills.
//!
//! Several independently-sourced registries are merged into one read view.
//! Aggregated reads prefix every entry with its registry name; scoped reads
//! keep bare names. Listings page through opaque base64 cursors, and a
//! TTL-cached snapshot serves reads while the store takes mutations.
//!
//! # Example
//!
//! ```rust,ignore
//! use registry_core::options::{with_limit, with_search};
//! use registry_core::{build_components, DatabaseConfig, ServiceConfig, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> registry_core::Result<()> {
//!     let backend = StorageBackend::Database(Some(DatabaseConfig::new("/var/lib/registry.db")));
//!     let components = build_components(&backend, ServiceConfig::default()).await?;
//!
//!     let page = components
//!         .registry_service
//!         .list_servers(vec![with_search("fetch"), with_limit(20)])
//!         .await?;
//!     println!("{} servers, more: {}", page.entries.len(), page.has_more());
//!
//!     components.teardown.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod model;
pub mod naming;
pub mod options;
pub mod provider;
pub mod service;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::{
    DatabaseConfig, EntryFamily, FileStorageConfig, RegistryConfigFile, StorageConfig, StorageKind,
};
pub use cursor::{decode_cursor, encode_cursor, Cursor};
pub use error::{RegistryError, Result};
pub use model::{
    CatalogEntry, CatalogSnapshot, CreationType, EntryStatus, ListResult, Registry,
    RegistryCatalog, RegistryDefinition, RegistrySource, ServerEntry, SkillEntry, SyncPhase,
    SyncStatus,
};
pub use options::QueryOption;
pub use provider::{DirectoryDataProvider, RegistryDataProvider, StoreDataProvider};
pub use service::{RegistryService, ServiceConfig};
pub use storage::{
    build_components, build_components_with_provider, CatalogStore, StorageBackend,
    StorageComponents, StorageFactory, Teardown,
};
pub use sync::{ConfigReconcileReport, RegistrySyncState, SyncStateTracker, SyncWriter};
