//! Administrative source and sync endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use homeboard_domain::{
    CalendarSource, SourceConfig, SourceKind, SourceOptions, SyncAllSummary, SyncCycleReport,
    TriggerOptions, WritePolicy,
};
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;

/// Body of `PUT /api/admin/sources/{id}`; the id comes from the path
#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub kind: SourceKind,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub url: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub write_policy: WritePolicy,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub options: SourceOptions,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRequest {
    fn into_config(self, id: String) -> SourceConfig {
        SourceConfig {
            id,
            kind: self.kind,
            name: self.name,
            color: self.color,
            url: self.url,
            credential_ref: self.credential_ref,
            write_policy: self.write_policy,
            enabled: self.enabled,
            options: self.options,
        }
    }
}

/// Every source with its sync bookkeeping
pub async fn list_sources(State(ctx): State<AppState>) -> Result<Json<Vec<CalendarSource>>, ApiError> {
    Ok(Json(ctx.sources.list_sources().await?))
}

/// Create or replace a source and (re)install its schedule
pub async fn save_source(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SourceRequest>, JsonRejection>,
) -> Result<Json<CalendarSource>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let source = request.into_config(id).to_source();

    Ok(Json(ctx.orchestrator.save_source(source).await?))
}

/// Cancel a source's schedule and delete it with its events
pub async fn delete_source(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if ctx.orchestrator.delete_source(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("source '{id}'")))
    }
}

/// Run one cycle for a source now.
///
/// `?force=true` skips the minimum interval; `?wait=false` fails with
/// `409` instead of queueing behind an in-flight cycle.
pub async fn trigger_sync(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    options: Result<Query<TriggerOptions>, QueryRejection>,
) -> Result<Json<SyncCycleReport>, ApiError> {
    let Query(options) = options.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(ctx.orchestrator.trigger(&id, options).await?))
}

/// Run every enabled source concurrently
pub async fn sync_all(State(ctx): State<AppState>) -> Result<Json<SyncAllSummary>, ApiError> {
    Ok(Json(ctx.orchestrator.sync_all().await?))
}
