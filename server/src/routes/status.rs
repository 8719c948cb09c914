//! Sync status endpoints.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use listsync_engine::AnchorSnapshot;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::sync_loop::{CycleReport, SyncStatus};
use crate::AppState;

/// Status response: configuration plus the loop's live status.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub sync_direction: &'static str,
    pub delete_origin: bool,
    pub interval_secs: u64,
    #[serde(flatten)]
    pub status: SyncStatus,
}

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status_handler))
        .route("/state", get(state_handler))
        .route("/sync", post(sync_handler))
}

/// GET /status - Current phase and the last cycle's report.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let policy = state.sync.policy();
    Json(StatusResponse {
        sync_direction: policy.direction(),
        delete_origin: policy.deletes_origin(),
        interval_secs: state.sync.interval().as_secs(),
        status: state.sync.status(),
    })
}

/// GET /state - The last committed anchor.
async fn state_handler(State(state): State<AppState>) -> Result<Json<AnchorSnapshot>> {
    let anchor = state
        .sync
        .committed_anchor()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(anchor))
}

/// POST /sync - Run a cycle now. 409 while one is already running.
async fn sync_handler(State(state): State<AppState>) -> Result<Json<CycleReport>> {
    let report = state.sync.run_once().await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::client::memory::Call;
    use crate::error::ClientError;
    use crate::routes::test_support::{app, call};
    use crate::sync_loop::Phase;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn manual_sync_reports_the_cycle() {
        let app = app();
        app.a.insert("Milk");

        let (status, body) = call(&app.router, "POST", "/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["planned"], 1);
        assert_eq!(body["succeeded"], 1);
        assert_eq!(body["persisted"], true);
        assert_eq!(app.b.texts(), vec!["Milk".to_string()]);

        let (status, body) = call(&app.router, "GET", "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["syncDirection"], "both");
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["cyclesCompleted"], 1);
        assert_eq!(body["lastReport"]["planned"], 1);
        assert_eq!(body["lastReport"]["anchor"]["recordCount"], 1);
        assert_eq!(body["lastReport"]["anchor"]["linkedCount"], 1);
        assert!(body["lastReport"].get("reauthRequired").is_none());
    }

    #[tokio::test]
    async fn state_shows_the_committed_anchor() {
        let app = app();
        let (status, body) = call(&app.router, "GET", "/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"], serde_json::json!({}));

        app.a.insert("Milk");
        app.sync.run_once().await.unwrap();

        let (_, body) = call(&app.router, "GET", "/state").await;
        let records = body["records"].as_object().unwrap();
        assert_eq!(records.len(), 1);
        let record = records.values().next().unwrap();
        assert_eq!(record["textAtAnchor"], "Milk");
        assert_eq!(record["idOnA"], "a-1");
        assert_eq!(record["idOnB"], "t-1");
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sync_is_rejected_while_busy() {
        let app = app();
        app.a.set_latency(Some(Duration::from_secs(5)));
        let mut status = app.sync.subscribe();

        let sync = app.sync.clone();
        let running = tokio::spawn(async move { sync.run_once().await });
        status
            .wait_for(|s| s.phase == Phase::Fetching)
            .await
            .unwrap();

        let (code, body) = call(&app.router, "POST", "/sync").await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already running"));

        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn manual_sync_surfaces_fetch_failures() {
        let app = app();
        app.a
            .fail_next(Call::Fetch, ClientError::Transient("connection reset".into()));

        let (code, body) = call(&app.router, "POST", "/sync").await;
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert!(body["details"].as_str().unwrap().contains("connection reset"));
    }
}
