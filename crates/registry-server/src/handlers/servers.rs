//! Server listing, lookup, publish and delete.

use super::{push_limit, push_param, push_updated_since, ApiResult, ListMetadata, RegistryScope};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use registry_core::options::{
    with_cursor, with_name, with_registry_name, with_search, with_status, with_version,
};
use registry_core::{EntryFamily, EntryStatus, ServerEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ListServersQuery {
    pub search: Option<String>,
    pub registry: Option<String>,
    pub status: Option<String>,
    pub version: Option<String>,
    pub updated_since: Option<String>,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

/// Body of a server publish. Missing fields default to empty and are
/// reported by validation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishServerBody {
    pub name: String,
    pub version: String,
    pub description: String,
    pub status: EntryStatus,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl PublishServerBody {
    fn into_entry(self) -> ServerEntry {
        let mut entry = ServerEntry::new(self.name, self.version, self.description);
        entry.status = self.status;
        entry.tags = self.tags;
        entry.metadata = self.metadata;
        entry
    }
}

#[derive(Debug, Serialize)]
pub struct ServerListResponse {
    pub servers: Vec<ServerEntry>,
    pub metadata: ListMetadata,
}

#[derive(Debug, Serialize)]
pub struct ServerVersionsResponse {
    pub servers: Vec<ServerEntry>,
}

/// `GET /v0/servers`
pub async fn handle_list_servers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListServersQuery>,
) -> ApiResult<Json<ServerListResponse>> {
    let mut options = Vec::new();
    push_param(&mut options, query.search, with_search);
    push_param(&mut options, query.registry, with_registry_name);
    push_param(&mut options, query.status, with_status);
    push_param(&mut options, query.version, with_version);
    push_param(&mut options, query.cursor, with_cursor);
    push_updated_since(&mut options, query.updated_since.as_deref())?;
    push_limit(&mut options, EntryFamily::Servers, query.limit.as_deref())?;

    let page = state.service.list_servers(options).await?;
    Ok(Json(ServerListResponse {
        metadata: ListMetadata {
            next_cursor: page.next_cursor,
            count: page.entries.len(),
        },
        servers: page.entries,
    }))
}

/// `GET /v0/servers/:name/versions`
pub async fn handle_list_server_versions(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(scope): Query<RegistryScope>,
) -> ApiResult<Json<ServerVersionsResponse>> {
    let mut options = vec![with_name(name)];
    push_param(&mut options, scope.registry, with_registry_name);

    let servers = state.service.list_server_versions(options).await?;
    Ok(Json(ServerVersionsResponse { servers }))
}

/// `GET /v0/servers/:name/versions/:version` (`latest` is accepted)
pub async fn handle_get_server_version(
    State(state): State<Arc<AppState>>,
    Path((name, version)): Path<(String, String)>,
    Query(scope): Query<RegistryScope>,
) -> ApiResult<Json<ServerEntry>> {
    let mut options = vec![with_name(name), with_version(version)];
    push_param(&mut options, scope.registry, with_registry_name);

    let entry = state.service.get_server_version(options).await?;
    Ok(Json(entry))
}

/// `POST /v0/registries/:registry/servers`
pub async fn handle_publish_server(
    State(state): State<Arc<AppState>>,
    Path(registry): Path<String>,
    Json(body): Json<PublishServerBody>,
) -> ApiResult<(StatusCode, Json<ServerEntry>)> {
    let entry = state
        .service
        .publish_server_version(body.into_entry(), vec![with_registry_name(registry)])
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `DELETE /v0/registries/:registry/servers/:name/versions/:version`
pub async fn handle_delete_server_version(
    State(state): State<Arc<AppState>>,
    Path((registry, name, version)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_server_version(vec![
            with_registry_name(registry),
            with_name(name),
            with_version(version),
        ])
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
