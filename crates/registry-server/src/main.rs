//! Registry Server - HTTP front end for the aggregated MCP registry.
//!
//! Loads the registry configuration, reconciles configured registries into
//! storage, and serves the registry API until interrupted.

use anyhow::{bail, Context, Result};
use clap::Parser;
use registry_core::{
    build_components, build_components_with_provider, DatabaseConfig, DirectoryDataProvider,
    FileStorageConfig, RegistryConfigFile, ServiceConfig, StorageBackend,
};
use registry_server::{start_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "registry-server")]
#[command(about = "Aggregated MCP server and skill registry")]
struct Args {
    /// Registry configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage backend, overriding the configuration file
    #[arg(long, value_parser = ["file", "database"])]
    storage: Option<String>,

    /// Data directory for the file store and the default database path
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// SQLite database path (implies --storage database)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Serve reads from a directory of catalog files instead of storage
    #[arg(long)]
    catalog_dir: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Snapshot cache lifetime in seconds
    #[arg(long)]
    cache_ttl_secs: Option<u64>,

    /// Upper bound on one catalog fetch in seconds
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting registry server");

    let config = match &args.config {
        Some(path) => RegistryConfigFile::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => RegistryConfigFile::default(),
    };

    let data_dir = match &args.data_dir {
        Some(dir) => dir.clone(),
        None => default_data_dir()?,
    };
    let backend = resolve_backend(&args, &config, &data_dir);
    info!("Using {:?} storage", backend.kind());

    let mut service_config = ServiceConfig::default();
    if let Some(secs) = args.cache_ttl_secs {
        service_config.cache_ttl = Duration::from_secs(secs);
    }
    service_config.fetch_timeout = args.fetch_timeout_secs.map(Duration::from_secs);

    let components = match &args.catalog_dir {
        Some(dir) => {
            info!("Serving read-only catalogs from {}", dir.display());
            service_config.read_only = true;
            let provider = Arc::new(DirectoryDataProvider::new(dir));
            build_components_with_provider(&backend, service_config, provider).await?
        }
        None => build_components(&backend, service_config).await?,
    };

    match components.state_tracker.reconcile_config(&config).await {
        Ok(report) => {
            info!(
                "Configured registries reconciled: {} inserted, {} updated, {} removed",
                report.inserted, report.updated, report.removed
            );
            components.registry_service.invalidate_cache().await;
        }
        Err(e) => {
            components.teardown.run().await;
            return Err(e).context("failed to apply registry configuration");
        }
    }

    let teardown = components.teardown.clone();
    let state = Arc::new(AppState {
        service: components.registry_service,
        tracker: components.state_tracker,
    });

    let addr = match start_server(state, &args.host, args.port).await {
        Ok(addr) => addr,
        Err(e) => {
            teardown.run().await;
            return Err(e);
        }
    };
    info!("Registry server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, releasing storage");
    teardown.run().await;

    Ok(())
}

/// Pick the backend: CLI flags first, then the configuration file, then a
/// file store under the data directory.
fn resolve_backend(args: &Args, config: &RegistryConfigFile, data_dir: &Path) -> StorageBackend {
    if let Some(path) = &args.database {
        return StorageBackend::Database(Some(DatabaseConfig::new(path)));
    }
    match args.storage.as_deref() {
        Some("database") => {
            let configured = config
                .storage
                .as_ref()
                .and_then(|storage| storage.database.clone());
            StorageBackend::Database(
                configured.or_else(|| Some(DatabaseConfig::new(data_dir.join("registry.db")))),
            )
        }
        Some("file") => StorageBackend::File(FileStorageConfig {
            base_dir: data_dir.to_path_buf(),
        }),
        _ => StorageBackend::from_config(config.storage.as_ref(), data_dir),
    }
}

fn default_data_dir() -> Result<PathBuf> {
    match dirs::data_dir() {
        Some(dir) => Ok(dir.join("mcp-registry")),
        None => bail!("no platform data directory; pass --data-dir"),
    }
}
