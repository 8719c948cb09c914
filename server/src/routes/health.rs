//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use listsync_engine::Side;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reauth_required: Option<Side>,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler. Reports `degraded` while a list needs a new login.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let reauth_required = state.sync.status().reauth_required;
    let status = if reauth_required.is_some() {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        reauth_required,
    })
}

/// Root handler.
async fn root() -> &'static str {
    "listsync daemon"
}
