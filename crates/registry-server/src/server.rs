//! HTTP server implementation using Axum.

use crate::handlers::{
    handle_create_registry, handle_delete_registry, handle_delete_server_version,
    handle_delete_skill_version, handle_get_registry, handle_get_server_version,
    handle_get_skill_version, handle_health, handle_list_registries, handle_list_server_versions,
    handle_list_servers, handle_list_skill_versions, handle_list_skills, handle_list_sync_status,
    handle_publish_server, handle_publish_skill, handle_readiness, handle_registry_sync_status,
    handle_update_registry,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use registry_core::{RegistryService, SyncStateTracker};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    /// Aggregated read view plus mutation paths
    pub service: RegistryService,
    /// Per-registry sync bookkeeping
    pub tracker: SyncStateTracker,
}

/// Build the router with every route attached to `state`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/readiness", get(handle_readiness))
        // Servers
        .route("/v0/servers", get(handle_list_servers))
        .route("/v0/servers/:name/versions", get(handle_list_server_versions))
        .route(
            "/v0/servers/:name/versions/:version",
            get(handle_get_server_version),
        )
        .route("/v0/registries/:registry/servers", post(handle_publish_server))
        .route(
            "/v0/registries/:registry/servers/:name/versions/:version",
            delete(handle_delete_server_version),
        )
        // Skills
        .route("/v0/skills", get(handle_list_skills))
        .route(
            "/v0/skills/:namespace/:name/versions",
            get(handle_list_skill_versions),
        )
        .route(
            "/v0/skills/:namespace/:name/versions/:version",
            get(handle_get_skill_version),
        )
        .route("/v0/registries/:registry/skills", post(handle_publish_skill))
        .route(
            "/v0/registries/:registry/skills/:namespace/:name/versions/:version",
            delete(handle_delete_skill_version),
        )
        // Registries
        .route(
            "/v0/registries",
            get(handle_list_registries).post(handle_create_registry),
        )
        .route(
            "/v0/registries/:registry",
            get(handle_get_registry)
                .put(handle_update_registry)
                .delete(handle_delete_registry),
        )
        .route("/v0/registries/:registry/sync", get(handle_registry_sync_status))
        .route("/v0/sync", get(handle_list_sync_status))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
