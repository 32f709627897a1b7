//! Liveness / heartbeat endpoints.

use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

use crate::state::AppState;

pub const LIVENESS_MESSAGE: &str = "Video conversion server is up!";

#[derive(OpenApi)]
#[openapi(paths(get_root, get_health), components(schemas(HealthStatus)))]
pub struct HealthApi;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_root))
        .route("/health", get(get_health))
}

/// Plain-text liveness message.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = 200, description = "Server is up", body = String, content_type = "text/plain")
    )
)]
pub async fn get_root() -> &'static str {
    LIVENESS_MESSAGE
}

/// Heartbeat endpoint.
///
/// Always `{"status": "ok", "version": "..."}`; there is nothing stateful to
/// check beyond the process answering.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = HealthStatus)
    )
)]
pub async fn get_health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
