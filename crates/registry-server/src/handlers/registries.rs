//! Registry administration and sync status.

use super::ApiResult;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use registry_core::{Registry, RegistryDefinition, RegistrySyncState, SyncStatus};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct RegistryListResponse {
    pub registries: Vec<Registry>,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusListResponse {
    pub registries: Vec<RegistrySyncState>,
}

/// `GET /v0/registries`
pub async fn handle_list_registries(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<RegistryListResponse>> {
    let registries = state.service.list_registries().await?;
    Ok(Json(RegistryListResponse { registries }))
}

/// `GET /v0/registries/:registry`
pub async fn handle_get_registry(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Registry>> {
    Ok(Json(state.service.get_registry(&name).await?))
}

/// `POST /v0/registries`
pub async fn handle_create_registry(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<RegistryDefinition>,
) -> ApiResult<(StatusCode, Json<Registry>)> {
    let registry = state.service.create_registry(&definition).await?;
    Ok((StatusCode::CREATED, Json(registry)))
}

/// `PUT /v0/registries/:registry`
pub async fn handle_update_registry(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(definition): Json<RegistryDefinition>,
) -> ApiResult<Json<Registry>> {
    Ok(Json(state.service.update_registry(&name, &definition).await?))
}

/// `DELETE /v0/registries/:registry`
pub async fn handle_delete_registry(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_registry(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v0/registries/:registry/sync`
pub async fn handle_registry_sync_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<SyncStatus>> {
    Ok(Json(state.tracker.get_status(&name).await?))
}

/// `GET /v0/sync`
pub async fn handle_list_sync_status(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<SyncStatusListResponse>> {
    let registries = state.tracker.list_statuses().await?;
    Ok(Json(SyncStatusListResponse { registries }))
}
