//! Error types for the daemon.

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use listsync_engine::Side;
use serde::Serialize;

use crate::sync_loop::Phase;

/// Failure reported by a [`ListClient`](crate::client::ListClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Credentials expired or were rejected; a human has to log in again.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Network error, rate limit, timeout. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("item not found: {0}")]
    NotFound(String),

    #[error("{0} is not supported by this list")]
    Unsupported(&'static str),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

/// Anchor store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode anchor: {0}")]
    Encode(#[from] listsync_engine::Error),

    #[error("persistence task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Why a cycle ended without completing.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("list {side} needs re-authentication: {message}")]
    Auth { side: Side, message: String },

    #[error("fetching list {side} failed: {source}")]
    Fetch {
        side: Side,
        #[source]
        source: ClientError,
    },

    #[error("persisting the anchor failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("engine rejected the cycle: {0}")]
    Engine(#[from] listsync_engine::Error),

    #[error("a cycle is already running")]
    Busy,

    #[error("cancelled before {0}")]
    Cancelled(Phase),
}

impl CycleError {
    /// Map a fetch failure on `side`, keeping auth failures distinguishable.
    pub fn from_fetch(side: Side, error: ClientError) -> Self {
        match error {
            ClientError::Auth(message) => CycleError::Auth { side, message },
            source => CycleError::Fetch { side, source },
        }
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(self, CycleError::Auth { .. })
    }
}

/// Error type of the HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("A sync cycle is already running")]
    Busy,

    #[error("Sync cycle failed: {0}")]
    Cycle(CycleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CycleError> for AppError {
    fn from(error: CycleError) -> Self {
        match error {
            CycleError::Busy => AppError::Busy,
            other => AppError::Cycle(other),
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Busy => (StatusCode::CONFLICT, self.to_string(), None),
            AppError::Cycle(e) if e.needs_reauth() => {
                tracing::warn!("Manual sync needs re-authentication: {}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    "Re-authentication required".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Cycle(CycleError::Cancelled(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Shutting down".to_string(),
                None,
            ),
            AppError::Cycle(e) => {
                tracing::error!("Manual sync failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "Sync cycle failed".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
