//! REST API and WebSocket surface of the server.
//!
//! All REST endpoints are `GET` and return `application/json`; non-GET
//! methods get 405. Handlers are pure projections over the snapshot store
//! and the alert engine.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` — fleet health summary
//! - `GET /api/v1/pipelines` — live pipelines
//! - `GET /api/v1/pipelines/{id}` — one pipeline
//! - `GET /api/v1/signals` — per-signal aggregates
//! - `GET /api/v1/alerts` — firing + recently resolved alerts
//! - `GET /api/v1/certs` — certificate statuses
//! - `GET /api/v1/snapshot` — the broadcast payload
//! - `WS  /ws/stream` — periodic snapshot stream

pub mod diagnostics;
pub mod error;
pub mod routes;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use types::{
    build_health, build_signals, build_snapshot, to_pipeline_response, CertResponse,
    HealthResponse, PipelineResponse, SignalAggregate, SignalResponse, SignalsResponse,
    SnapshotResponse,
};

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::alerts;
use crate::store::Store;
use crate::ws::Hub;

/// Shared state for all handlers and the WebSocket upgrade.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<Store>,
    pub alerts: Arc<alerts::Engine>,
    pub hub: Arc<Hub>,
}

/// Builds the HTTP router: REST routes, the WebSocket endpoint, request
/// tracing and permissive CORS (dashboards are served from anywhere;
/// tighten at the reverse proxy if needed).
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health))
        .route("/api/v1/pipelines", get(routes::list_pipelines))
        .route("/api/v1/pipelines/:id", get(routes::get_pipeline))
        .route("/api/v1/signals", get(routes::signals))
        .route("/api/v1/alerts", get(routes::alerts))
        .route("/api/v1/certs", get(routes::certs))
        .route("/api/v1/snapshot", get(routes::snapshot))
        .route("/ws/stream", get(crate::ws::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
