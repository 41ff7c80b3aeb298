//! SQLite-backed catalog store.
//!
//! Connections come from a bounded `deadpool` pool. Each connection registers
//! the `semver` collation the first time an entry query runs on it, so
//! latest-version selection happens inside SQL.

use super::CatalogStore;
use crate::config::{DatabaseConfig, DatabaseDefaults};
use crate::error::{RegistryError, Result};
use crate::model::{
    all_semver, recompute_latest, CreationType, EntryStatus, FilterRules, Registry, RegistryCatalog,
    RegistryFormat, RegistrySource, ServerEntry, SkillEntry, SyncPhase, SyncPolicy, SyncStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use deadpool::managed::{self, Manager, Metrics, Pool, PoolError, RecycleError};
use deadpool::Runtime;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::Arc;
use tracing::{debug, info};

const SEMVER_COLLATION: &str = "semver";

// ========================================
// Column codecs
// ========================================

impl ToSql for EntryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        EntryStatus::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown entry status '{}'", raw).into()))
    }
}

impl ToSql for SyncPhase {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncPhase {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        SyncPhase::parse(raw)
            .ok_or_else(|| FromSqlError::Other(format!("unknown sync phase '{}'", raw).into()))
    }
}

impl ToSql for CreationType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let raw = match self {
            CreationType::Api => "API",
            CreationType::Config => "CONFIG",
        };
        Ok(ToSqlOutput::from(raw))
    }
}

impl FromSql for CreationType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "API" => Ok(CreationType::Api),
            "CONFIG" => Ok(CreationType::Config),
            other => Err(FromSqlError::Other(
                format!("unknown creation type '{}'", other).into(),
            )),
        }
    }
}

/// Semver-aware total order: valid semver sorts above anything else, and
/// non-semver strings compare bytewise.
fn semver_collation(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn to_json_text<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ========================================
// Connection pool
// ========================================

/// A pooled connection that lazily registers its custom collation.
pub struct SqliteConnection {
    conn: Connection,
    codecs_ready: bool,
    registrations: Arc<AtomicUsize>,
}

impl SqliteConnection {
    /// The connection without custom collations.
    fn raw(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// The connection with the semver collation registered.
    fn with_codecs(&mut self) -> Result<&mut Connection> {
        if !self.codecs_ready {
            self.conn
                .create_collation(SEMVER_COLLATION, semver_collation)?;
            self.codecs_ready = true;
            self.registrations.fetch_add(1, atomic::Ordering::SeqCst);
            debug!("Registered {} collation on pooled connection", SEMVER_COLLATION);
        }
        Ok(&mut self.conn)
    }
}

pub struct SqliteManager {
    path: PathBuf,
    busy_timeout_ms: u64,
    registrations: Arc<AtomicUsize>,
}

impl SqliteManager {
    fn open(&self) -> rusqlite::Result<SqliteConnection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA foreign_keys=ON;",
            self.busy_timeout_ms,
        ))?;
        Ok(SqliteConnection {
            conn,
            codecs_ready: false,
            registrations: Arc::clone(&self.registrations),
        })
    }
}

impl Manager for SqliteManager {
    type Type = SqliteConnection;
    type Error = rusqlite::Error;

    fn create(&self) -> impl std::future::Future<Output = std::result::Result<Self::Type, Self::Error>> + Send {
        let opened = self.open();
        async move { opened }
    }

    fn recycle(
        &self,
        obj: &mut Self::Type,
        _metrics: &Metrics,
    ) -> impl std::future::Future<Output = managed::RecycleResult<Self::Error>> + Send {
        let check = obj
            .conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(RecycleError::Backend);
        async move { check }
    }
}

type PooledConnection = managed::Object<SqliteManager>;

// ========================================
// Store
// ========================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDefinitionColumn {
    source: RegistrySource,
    #[serde(default)]
    format: RegistryFormat,
    #[serde(default)]
    filter: Option<FilterRules>,
    #[serde(default)]
    sync_policy: Option<SyncPolicy>,
}

impl RegistryDefinitionColumn {
    fn from_registry(registry: &Registry) -> Self {
        Self {
            source: registry.source.clone(),
            format: registry.format,
            filter: registry.filter.clone(),
            sync_policy: registry.sync_policy,
        }
    }
}

const REGISTRY_COLUMNS: &str = "name, creation_type, definition_json, sync_phase, last_attempt, \
     last_success, attempt_count, entry_count, sync_message, created_at, updated_at";

const SERVER_COLUMNS: &str =
    "name, version, description, status, is_latest, tags_json, updated_at, metadata_json";

const SKILL_COLUMNS: &str =
    "namespace, name, version, description, status, is_latest, tags_json, updated_at, metadata_json";

/// Catalog store backed by a pooled SQLite database.
pub struct SqliteCatalogStore {
    pool: Pool<SqliteManager>,
    path: PathBuf,
    registrations: Arc<AtomicUsize>,
}

impl SqliteCatalogStore {
    /// Open (creating if needed) the database described by `config`.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io {
                    message: format!("failed to create database directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let registrations = Arc::new(AtomicUsize::new(0));
        let manager = SqliteManager {
            path: config.path.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
            registrations: Arc::clone(&registrations),
        };

        let pool = Pool::builder(manager)
            .max_size(config.max_connections.max(1))
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(DatabaseDefaults::ACQUIRE_TIMEOUT))
            .create_timeout(Some(DatabaseDefaults::ACQUIRE_TIMEOUT))
            .build()
            .map_err(|e| RegistryError::database(format!("failed to build connection pool: {}", e)))?;

        let store = Self {
            pool,
            path: config.path.clone(),
            registrations,
        };

        let mut pooled = store.acquire().await?;
        Self::ensure_schema(pooled.raw())?;
        drop(pooled);

        info!("Opened SQLite catalog store at {}", store.path.display());
        Ok(store)
    }

    /// How many pooled connections have registered the semver collation.
    pub fn codec_registrations(&self) -> usize {
        self.registrations.load(atomic::Ordering::SeqCst)
    }

    pub fn status(&self) -> deadpool::Status {
        self.pool.status()
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS registries (
                name TEXT PRIMARY KEY,
                creation_type TEXT NOT NULL,
                definition_json TEXT NOT NULL,
                sync_phase TEXT NOT NULL DEFAULT 'pending',
                last_attempt TEXT,
                last_success TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                entry_count INTEGER NOT NULL DEFAULT 0,
                sync_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS servers (
                registry TEXT NOT NULL REFERENCES registries(name) ON DELETE CASCADE,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                is_latest INTEGER NOT NULL DEFAULT 0,
                tags_json TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT 'null',
                PRIMARY KEY (registry, name, version)
            );

            CREATE TABLE IF NOT EXISTS skills (
                registry TEXT NOT NULL REFERENCES registries(name) ON DELETE CASCADE,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                is_latest INTEGER NOT NULL DEFAULT 0,
                tags_json TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT 'null',
                PRIMARY KEY (registry, namespace, name, version)
            );",
        )?;
        Ok(())
    }

    async fn acquire(&self) -> Result<PooledConnection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Closed => RegistryError::database("connection pool is closed"),
            PoolError::Backend(source) => RegistryError::Database {
                message: format!("failed to open connection: {}", source),
                source: Some(source),
            },
            other => RegistryError::database(format!("failed to acquire connection: {}", other)),
        })
    }

    /// Run `f` on a pooled connection without custom collations.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send,
        T: Send,
    {
        let mut pooled = self.acquire().await?;
        f(pooled.raw())
    }

    /// Run `f` on a pooled connection with the semver collation registered.
    async fn with_entry_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send,
        T: Send,
    {
        let mut pooled = self.acquire().await?;
        f(pooled.with_codecs()?)
    }
}

fn registry_from_row(row: &Row<'_>) -> rusqlite::Result<Registry> {
    let definition: RegistryDefinitionColumn = json_column(row, 2)?;
    Ok(Registry {
        name: row.get(0)?,
        creation_type: row.get(1)?,
        source: definition.source,
        format: definition.format,
        filter: definition.filter,
        sync_policy: definition.sync_policy,
        sync_status: SyncStatus {
            phase: row.get(3)?,
            last_attempt: row.get(4)?,
            last_success: row.get(5)?,
            attempt_count: row.get(6)?,
            entry_count: row.get(7)?,
            message: row.get(8)?,
        },
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn server_from_row(row: &Row<'_>) -> rusqlite::Result<ServerEntry> {
    Ok(ServerEntry {
        name: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        is_latest: row.get(4)?,
        tags: json_column(row, 5)?,
        updated_at: row.get(6)?,
        metadata: json_column(row, 7)?,
    })
}

fn skill_from_row(row: &Row<'_>) -> rusqlite::Result<SkillEntry> {
    Ok(SkillEntry {
        namespace: row.get(0)?,
        name: row.get(1)?,
        version: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        is_latest: row.get(5)?,
        tags: json_column(row, 6)?,
        updated_at: row.get(7)?,
        metadata: json_column(row, 8)?,
    })
}

fn ensure_registry(conn: &Connection, registry: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM registries WHERE name = ?1)",
        params![registry],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(RegistryError::RegistryNotFound {
            name: registry.to_string(),
        })
    }
}

fn insert_server_row(conn: &Connection, registry: &str, entry: &ServerEntry) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO servers (registry, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            SERVER_COLUMNS
        ),
        params![
            registry,
            entry.name,
            entry.version,
            entry.description,
            entry.status,
            entry.is_latest,
            to_json_text(&entry.tags)?,
            entry.updated_at,
            to_json_text(&entry.metadata)?,
        ],
    )?;
    Ok(())
}

fn insert_skill_row(conn: &Connection, registry: &str, entry: &SkillEntry) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO skills (registry, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            SKILL_COLUMNS
        ),
        params![
            registry,
            entry.namespace,
            entry.name,
            entry.version,
            entry.description,
            entry.status,
            entry.is_latest,
            to_json_text(&entry.tags)?,
            entry.updated_at,
            to_json_text(&entry.metadata)?,
        ],
    )?;
    Ok(())
}

/// ORDER BY terms that put the latest version first: the semver collation
/// when every version of the entry parses, otherwise the most recent update.
fn latest_order(versions: &[String]) -> &'static str {
    if all_semver(versions.iter().map(String::as_str)) {
        "version COLLATE semver DESC"
    } else {
        "updated_at DESC, version DESC"
    }
}

/// Re-flag the latest server version of `name`.
fn refresh_server_latest(conn: &Connection, registry: &str, name: &str) -> Result<()> {
    let versions = conn
        .prepare("SELECT version FROM servers WHERE registry = ?1 AND name = ?2")?
        .query_map(params![registry, name], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    conn.execute(
        "UPDATE servers SET is_latest = 0 WHERE registry = ?1 AND name = ?2",
        params![registry, name],
    )?;
    conn.execute(
        &format!(
            "UPDATE servers SET is_latest = 1
             WHERE registry = ?1 AND name = ?2 AND version = (
                 SELECT version FROM servers WHERE registry = ?1 AND name = ?2
                 ORDER BY {}
                 LIMIT 1
             )",
            latest_order(&versions)
        ),
        params![registry, name],
    )?;
    Ok(())
}

fn refresh_skill_latest(conn: &Connection, registry: &str, namespace: &str, name: &str) -> Result<()> {
    let versions = conn
        .prepare("SELECT version FROM skills WHERE registry = ?1 AND namespace = ?2 AND name = ?3")?
        .query_map(params![registry, namespace, name], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;

    conn.execute(
        "UPDATE skills SET is_latest = 0 WHERE registry = ?1 AND namespace = ?2 AND name = ?3",
        params![registry, namespace, name],
    )?;
    conn.execute(
        &format!(
            "UPDATE skills SET is_latest = 1
             WHERE registry = ?1 AND namespace = ?2 AND name = ?3 AND version = (
                 SELECT version FROM skills WHERE registry = ?1 AND namespace = ?2 AND name = ?3
                 ORDER BY {}
                 LIMIT 1
             )",
            latest_order(&versions)
        ),
        params![registry, namespace, name],
    )?;
    Ok(())
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    // ========================================
    // Registry records
    // ========================================

    async fn list_registries(&self) -> Result<Vec<Registry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM registries ORDER BY name",
                REGISTRY_COLUMNS
            ))?;
            let rows = stmt.query_map([], registry_from_row)?;

            let mut registries = Vec::new();
            for row in rows {
                registries.push(row?);
            }
            Ok(registries)
        })
        .await
    }

    async fn get_registry(&self, name: &str) -> Result<Option<Registry>> {
        self.with_conn(|conn| {
            let registry = conn
                .query_row(
                    &format!("SELECT {} FROM registries WHERE name = ?1", REGISTRY_COLUMNS),
                    params![name],
                    registry_from_row,
                )
                .optional()?;
            Ok(registry)
        })
        .await
    }

    async fn insert_registry(&self, registry: &Registry) -> Result<()> {
        let definition = serde_json::to_string(&RegistryDefinitionColumn::from_registry(registry))?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM registries WHERE name = ?1)",
                params![registry.name],
                |row| row.get(0),
            )?;
            if exists {
                return Err(RegistryError::RegistryAlreadyExists {
                    name: registry.name.clone(),
                });
            }

            let status = &registry.sync_status;
            tx.execute(
                &format!(
                    "INSERT INTO registries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    REGISTRY_COLUMNS
                ),
                params![
                    registry.name,
                    registry.creation_type,
                    definition,
                    status.phase,
                    status.last_attempt,
                    status.last_success,
                    status.attempt_count,
                    status.entry_count,
                    status.message,
                    registry.created_at,
                    registry.updated_at,
                ],
            )?;
            tx.commit()?;
            debug!("Inserted registry {}", registry.name);
            Ok(())
        })
        .await
    }

    async fn update_registry(&self, registry: &Registry) -> Result<()> {
        let definition = serde_json::to_string(&RegistryDefinitionColumn::from_registry(registry))?;
        self.with_conn(move |conn| {
            let status = &registry.sync_status;
            let changed = conn.execute(
                "UPDATE registries SET creation_type = ?2, definition_json = ?3, sync_phase = ?4,
                     last_attempt = ?5, last_success = ?6, attempt_count = ?7, entry_count = ?8,
                     sync_message = ?9, created_at = ?10, updated_at = ?11
                 WHERE name = ?1",
                params![
                    registry.name,
                    registry.creation_type,
                    definition,
                    status.phase,
                    status.last_attempt,
                    status.last_success,
                    status.attempt_count,
                    status.entry_count,
                    status.message,
                    registry.created_at,
                    registry.updated_at,
                ],
            )?;
            if changed == 0 {
                return Err(RegistryError::RegistryNotFound {
                    name: registry.name.clone(),
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete_registry(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM registries WHERE name = ?1", params![name])?;
            if deleted > 0 {
                debug!("Deleted registry {} and its entries", name);
            }
            Ok(deleted > 0)
        })
        .await
    }

    async fn update_sync_status(&self, name: &str, status: &SyncStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE registries SET sync_phase = ?2, last_attempt = ?3, last_success = ?4,
                     attempt_count = ?5, entry_count = ?6, sync_message = ?7
                 WHERE name = ?1",
                params![
                    name,
                    status.phase,
                    status.last_attempt,
                    status.last_success,
                    status.attempt_count,
                    status.entry_count,
                    status.message,
                ],
            )?;
            if changed == 0 {
                return Err(RegistryError::RegistryNotFound {
                    name: name.to_string(),
                });
            }
            Ok(())
        })
        .await
    }

    // ========================================
    // Catalog entries
    // ========================================

    async fn load_catalog(&self, registry: &str) -> Result<RegistryCatalog> {
        self.with_conn(|conn| {
            ensure_registry(conn, registry)?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM servers WHERE registry = ?1 ORDER BY name, version",
                SERVER_COLUMNS
            ))?;
            let mut servers = Vec::new();
            for row in stmt.query_map(params![registry], server_from_row)? {
                servers.push(row?);
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM skills WHERE registry = ?1 ORDER BY namespace, name, version",
                SKILL_COLUMNS
            ))?;
            let mut skills = Vec::new();
            for row in stmt.query_map(params![registry], skill_from_row)? {
                skills.push(row?);
            }

            Ok(RegistryCatalog { servers, skills })
        })
        .await
    }

    async fn replace_catalog(&self, registry: &str, mut catalog: RegistryCatalog) -> Result<()> {
        recompute_latest(&mut catalog.servers);
        recompute_latest(&mut catalog.skills);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            ensure_registry(&tx, registry)?;
            tx.execute("DELETE FROM servers WHERE registry = ?1", params![registry])?;
            tx.execute("DELETE FROM skills WHERE registry = ?1", params![registry])?;
            for server in &catalog.servers {
                insert_server_row(&tx, registry, server)?;
            }
            for skill in &catalog.skills {
                insert_skill_row(&tx, registry, skill)?;
            }
            tx.commit()?;
            debug!(
                "Replaced catalog of {} with {} entries",
                registry,
                catalog.entry_count()
            );
            Ok(())
        })
        .await
    }

    async fn insert_server(&self, registry: &str, mut entry: ServerEntry) -> Result<ServerEntry> {
        entry.updated_at = Utc::now();
        entry.is_latest = false;
        self.with_entry_conn(move |conn| {
            let tx = conn.transaction()?;
            ensure_registry(&tx, registry)?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM servers WHERE registry = ?1 AND name = ?2 AND version = ?3)",
                params![registry, entry.name, entry.version],
                |row| row.get(0),
            )?;
            if exists {
                return Err(RegistryError::VersionAlreadyExists {
                    name: entry.name,
                    version: entry.version,
                });
            }

            insert_server_row(&tx, registry, &entry)?;
            refresh_server_latest(&tx, registry, &entry.name)?;
            let stored = tx.query_row(
                &format!(
                    "SELECT {} FROM servers WHERE registry = ?1 AND name = ?2 AND version = ?3",
                    SERVER_COLUMNS
                ),
                params![registry, entry.name, entry.version],
                server_from_row,
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn delete_server(&self, registry: &str, name: &str, version: &str) -> Result<()> {
        self.with_entry_conn(|conn| {
            let tx = conn.transaction()?;
            ensure_registry(&tx, registry)?;
            let deleted = tx.execute(
                "DELETE FROM servers WHERE registry = ?1 AND name = ?2 AND version = ?3",
                params![registry, name, version],
            )?;
            if deleted == 0 {
                return Err(RegistryError::NotFound {
                    what: format!("{} version {}", name, version),
                });
            }
            refresh_server_latest(&tx, registry, name)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_skill(&self, registry: &str, mut entry: SkillEntry) -> Result<SkillEntry> {
        entry.updated_at = Utc::now();
        entry.is_latest = false;
        self.with_entry_conn(move |conn| {
            let tx = conn.transaction()?;
            ensure_registry(&tx, registry)?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM skills
                     WHERE registry = ?1 AND namespace = ?2 AND name = ?3 AND version = ?4)",
                params![registry, entry.namespace, entry.name, entry.version],
                |row| row.get(0),
            )?;
            if exists {
                return Err(RegistryError::VersionAlreadyExists {
                    name: format!("{}/{}", entry.namespace, entry.name),
                    version: entry.version,
                });
            }

            insert_skill_row(&tx, registry, &entry)?;
            refresh_skill_latest(&tx, registry, &entry.namespace, &entry.name)?;
            let stored = tx.query_row(
                &format!(
                    "SELECT {} FROM skills
                     WHERE registry = ?1 AND namespace = ?2 AND name = ?3 AND version = ?4",
                    SKILL_COLUMNS
                ),
                params![registry, entry.namespace, entry.name, entry.version],
                skill_from_row,
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn delete_skill(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> Result<()> {
        self.with_entry_conn(|conn| {
            let tx = conn.transaction()?;
            ensure_registry(&tx, registry)?;
            let deleted = tx.execute(
                "DELETE FROM skills
                 WHERE registry = ?1 AND namespace = ?2 AND name = ?3 AND version = ?4",
                params![registry, namespace, name, version],
            )?;
            if deleted == 0 {
                return Err(RegistryError::NotFound {
                    what: format!("{}/{} version {}", namespace, name, version),
                });
            }
            refresh_skill_latest(&tx, registry, namespace, name)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close();
            info!("Closed SQLite catalog store at {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::{
        exercise_latest_selection, exercise_store, managed_registry,
    };
    use tempfile::TempDir;

    async fn open_store(temp_dir: &TempDir) -> SqliteCatalogStore {
        SqliteCatalogStore::open(&DatabaseConfig::new(temp_dir.path().join("registry.db")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sqlite_store_behavior() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_latest_selection() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        exercise_latest_selection(&store).await;
    }

    #[tokio::test]
    async fn test_collation_registered_lazily_once_per_connection() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        assert_eq!(store.codec_registrations(), 0);

        store.insert_registry(&managed_registry("internal")).await.unwrap();
        store.list_registries().await.unwrap();
        assert_eq!(store.codec_registrations(), 0);

        for version in ["1.0.0", "1.1.0", "1.2.0"] {
            store
                .insert_server("internal", ServerEntry::new("fetch", version, "d"))
                .await
                .unwrap();
        }
        assert_eq!(store.codec_registrations(), 1);
    }

    #[tokio::test]
    async fn test_semver_collation_beats_string_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        store.insert_registry(&managed_registry("internal")).await.unwrap();

        store
            .insert_server("internal", ServerEntry::new("fetch", "1.10.0", "d"))
            .await
            .unwrap();
        let stored = store
            .insert_server("internal", ServerEntry::new("fetch", "1.9.0", "d"))
            .await
            .unwrap();
        assert!(!stored.is_latest);

        let catalog = store.load_catalog("internal").await.unwrap();
        let latest = catalog.servers.iter().find(|s| s.is_latest).unwrap();
        assert_eq!(latest.version, "1.10.0");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_later_calls() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        store.close().await;
        store.close().await;

        let err = store.list_registries().await.unwrap_err();
        assert!(matches!(err, RegistryError::Database { .. }));
    }

    #[test]
    fn test_semver_collation_ordering() {
        assert_eq!(semver_collation("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(semver_collation("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(semver_collation("latest", "1.0.0"), Ordering::Less);
        assert_eq!(semver_collation("nightly", "beta"), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_registry_round_trips_sync_status() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        let mut registry = managed_registry("internal");
        registry.sync_status = SyncStatus {
            phase: SyncPhase::Failed,
            last_attempt: Some(Utc::now()),
            last_success: None,
            attempt_count: 3,
            entry_count: 0,
            message: Some("boom".to_string()),
        };
        store.insert_registry(&registry).await.unwrap();

        let loaded = store.get_registry("internal").await.unwrap().unwrap();
        assert_eq!(loaded.sync_status.phase, SyncPhase::Failed);
        assert_eq!(loaded.sync_status.attempt_count, 3);
        assert_eq!(loaded.sync_status.message.as_deref(), Some("boom"));
        assert_eq!(loaded.creation_type, CreationType::Api);
        assert!(loaded.is_managed());
    }
}
