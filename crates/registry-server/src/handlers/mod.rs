//! HTTP request handlers, grouped by resource.

mod registries;
mod servers;
mod skills;

pub use registries::{
    handle_create_registry, handle_delete_registry, handle_get_registry, handle_list_registries,
    handle_list_sync_status, handle_registry_sync_status, handle_update_registry,
};
pub use servers::{
    handle_delete_server_version, handle_get_server_version, handle_list_server_versions,
    handle_list_servers, handle_publish_server, ListServersQuery, PublishServerBody,
};
pub use skills::{
    handle_delete_skill_version, handle_get_skill_version, handle_list_skill_versions,
    handle_list_skills, handle_publish_skill, ListSkillsQuery, PublishSkillBody,
};

use crate::server::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use registry_core::options::{with_limit, with_updated_since};
use registry_core::{EntryFamily, QueryOption, RegistryError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Message returned for every 500-class failure.
const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Handler result carrying a registry error that renders as an HTTP response.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A [`RegistryError`] rendered as `{"error": "..."}` with its mapped status.
#[derive(Debug)]
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            debug!("Request rejected ({}): {}", status, self.0);
            self.0.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Pagination block of a list response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    pub next_cursor: String,
    pub count: usize,
}

/// `?registry=` scope shared by the version lookups.
#[derive(Debug, Default, Deserialize)]
pub struct RegistryScope {
    pub registry: Option<String>,
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Readiness check: 503 while the data provider is failing. The cause is
/// logged, never returned.
pub async fn handle_readiness(State(state): State<Arc<AppState>>) -> Response {
    match state.service.check_readiness().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ready"}))).into_response(),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable"})),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Query parameter helpers
// ============================================================================

/// Push an option for a query parameter. Absent and empty values are skipped.
pub(crate) fn push_param(
    options: &mut Vec<QueryOption>,
    value: Option<String>,
    build: fn(String) -> QueryOption,
) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        options.push(build(value));
    }
}

/// Validate the raw `limit` parameter against the family cap.
pub(crate) fn push_limit(
    options: &mut Vec<QueryOption>,
    family: EntryFamily,
    raw: Option<&str>,
) -> Result<(), RegistryError> {
    if let Some(limit) = family.parse_limit(raw.filter(|v| !v.is_empty()))? {
        options.push(with_limit(limit as i64));
    }
    Ok(())
}

/// Parse the raw `updated_since` parameter as an RFC 3339 timestamp.
pub(crate) fn push_updated_since(
    options: &mut Vec<QueryOption>,
    raw: Option<&str>,
) -> Result<(), RegistryError> {
    let Some(raw) = raw.filter(|v| !v.is_empty()) else {
        return Ok(());
    };
    let since = DateTime::parse_from_rfc3339(raw).map_err(|_| {
        RegistryError::validation("invalid updated_since parameter: expected an RFC 3339 timestamp")
    })?;
    options.push(with_updated_since(since.with_timezone(&Utc)));
    Ok(())
}
