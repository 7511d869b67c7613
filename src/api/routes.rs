//! REST handlers — GET-only JSON projections over the store and the alert
//! engine. Non-GET methods get 405 from the router's method filtering.

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;

use crate::alerts::Alert;
use crate::api::error::{ApiError, ApiResult};
use crate::api::types::{
    build_health, build_signals, build_snapshot, to_pipeline_response, CertResponse,
    HealthResponse, PipelineResponse, SignalsResponse, SnapshotResponse,
};
use crate::api::ApiState;

/// GET /api/v1/health — fleet-wide score and state counts.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(build_health(&state.store, state.alerts.firing_count()))
}

/// GET /api/v1/pipelines — all live pipelines.
pub async fn list_pipelines(State(state): State<ApiState>) -> Json<Vec<PipelineResponse>> {
    let mut entries = state.store.list();
    entries.sort_by(|a, b| a.snapshot.source_id.cmp(&b.snapshot.source_id));
    Json(entries.iter().map(to_pipeline_response).collect())
}

/// GET /api/v1/pipelines/{id} — one live pipeline. An entry stale past the
/// TTL reads as not found even before eviction runs.
pub async fn get_pipeline(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PipelineResponse>> {
    let entry = state
        .store
        .get(&id)
        .ok_or_else(|| ApiError::NotFound("pipeline not found".into()))?;

    let age = (Utc::now() - entry.updated_at)
        .to_std()
        .unwrap_or_default();
    if age >= state.store.ttl() {
        return Err(ApiError::NotFound("pipeline not found".into()));
    }

    Ok(Json(to_pipeline_response(&entry)))
}

/// GET /api/v1/signals — per-signal aggregates across live pipelines.
pub async fn signals(State(state): State<ApiState>) -> Json<SignalsResponse> {
    Json(build_signals(&state.store))
}

/// GET /api/v1/alerts — currently firing alerts plus recently resolved.
pub async fn alerts(State(state): State<ApiState>) -> Json<Vec<Alert>> {
    Json(state.alerts.active())
}

/// GET /api/v1/certs — certificate statuses across live pipelines.
pub async fn certs(State(state): State<ApiState>) -> Json<Vec<CertResponse>> {
    let mut out = Vec::new();
    for entry in state.store.list() {
        out.extend(to_pipeline_response(&entry).certs);
    }
    out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Json(out)
}

/// GET /api/v1/snapshot — the same payload the WebSocket hub broadcasts.
pub async fn snapshot(State(state): State<ApiState>) -> Json<SnapshotResponse> {
    Json(build_snapshot(&state.store))
}
