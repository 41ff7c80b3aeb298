//! Skill listing, lookup, publish and delete.

use super::{push_limit, push_param, push_updated_since, ApiResult, ListMetadata, RegistryScope};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use registry_core::options::{
    with_cursor, with_name, with_namespace, with_registry_name, with_search, with_status,
    with_version,
};
use registry_core::{EntryFamily, EntryStatus, SkillEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct ListSkillsQuery {
    pub search: Option<String>,
    pub registry: Option<String>,
    pub namespace: Option<String>,
    pub status: Option<String>,
    pub version: Option<String>,
    pub updated_since: Option<String>,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishSkillBody {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub status: EntryStatus,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl PublishSkillBody {
    fn into_entry(self) -> SkillEntry {
        let mut entry = SkillEntry::new(self.namespace, self.name, self.version, self.description);
        entry.status = self.status;
        entry.tags = self.tags;
        entry.metadata = self.metadata;
        entry
    }
}

#[derive(Debug, Serialize)]
pub struct SkillListResponse {
    pub skills: Vec<SkillEntry>,
    pub metadata: ListMetadata,
}

#[derive(Debug, Serialize)]
pub struct SkillVersionsResponse {
    pub skills: Vec<SkillEntry>,
}

/// `GET /v0/skills`
pub async fn handle_list_skills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSkillsQuery>,
) -> ApiResult<Json<SkillListResponse>> {
    let mut options = Vec::new();
    push_param(&mut options, query.search, with_search);
    push_param(&mut options, query.registry, with_registry_name);
    push_param(&mut options, query.namespace, with_namespace);
    push_param(&mut options, query.status, with_status);
    push_param(&mut options, query.version, with_version);
    push_param(&mut options, query.cursor, with_cursor);
    push_updated_since(&mut options, query.updated_since.as_deref())?;
    push_limit(&mut options, EntryFamily::Skills, query.limit.as_deref())?;

    let page = state.service.list_skills(options).await?;
    Ok(Json(SkillListResponse {
        metadata: ListMetadata {
            next_cursor: page.next_cursor,
            count: page.entries.len(),
        },
        skills: page.entries,
    }))
}

/// `GET /v0/skills/:namespace/:name/versions`
pub async fn handle_list_skill_versions(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(scope): Query<RegistryScope>,
) -> ApiResult<Json<SkillVersionsResponse>> {
    let mut options = vec![with_namespace(namespace), with_name(name)];
    push_param(&mut options, scope.registry, with_registry_name);

    let skills = state.service.list_skill_versions(options).await?;
    Ok(Json(SkillVersionsResponse { skills }))
}

/// `GET /v0/skills/:namespace/:name/versions/:version`
pub async fn handle_get_skill_version(
    State(state): State<Arc<AppState>>,
    Path((namespace, name, version)): Path<(String, String, String)>,
    Query(scope): Query<RegistryScope>,
) -> ApiResult<Json<SkillEntry>> {
    let mut options = vec![
        with_namespace(namespace),
        with_name(name),
        with_version(version),
    ];
    push_param(&mut options, scope.registry, with_registry_name);

    let entry = state.service.get_skill_version(options).await?;
    Ok(Json(entry))
}

/// `POST /v0/registries/:registry/skills`
pub async fn handle_publish_skill(
    State(state): State<Arc<AppState>>,
    Path(registry): Path<String>,
    Json(body): Json<PublishSkillBody>,
) -> ApiResult<(StatusCode, Json<SkillEntry>)> {
    let entry = state
        .service
        .publish_skill_version(body.into_entry(), vec![with_registry_name(registry)])
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// `DELETE /v0/registries/:registry/skills/:namespace/:name/versions/:version`
pub async fn handle_delete_skill_version(
    State(state): State<Arc<AppState>>,
    Path((registry, namespace, name, version)): Path<(String, String, String, String)>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_skill_version(vec![
            with_registry_name(registry),
            with_namespace(namespace),
            with_name(name),
            with_version(version),
        ])
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
