//! listsync daemon - keeps a voice-assistant shopping list and a cloud to-do
//! list consistent.
//!
//! The daemon periodically fetches both lists, reconciles them against the
//! last committed anchor using the listsync-engine, applies the resulting
//! plan and persists the new anchor. An optional HTTP surface exposes the
//! loop's status and a manual trigger.

mod applier;
mod client;
mod config;
mod error;
mod routes;
mod store;
mod sync_loop;

use crate::applier::RetryPolicy;
use crate::client::{FileListClient, ListClient};
use crate::config::Config;
use crate::store::AnchorStore;
use crate::sync_loop::SyncLoop;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<SyncLoop>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "listsync_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!(
        direction = %config.policy,
        interval_secs = config.sync_interval.as_secs(),
        "Starting listsync"
    );

    // Build the two lists
    let list_a = FileListClient::new(&config.alexa_list_name, "a", &config.alexa_list_file);
    let list_b = FileListClient::new(&config.ms_list_name, "t", &config.ms_list_file);
    tracing::info!(
        a = %list_a.path().display(),
        b = %list_b.path().display(),
        cookie_file = %config.alexa_cookie_file.display(),
        token_file = %config.ms_token_file.display(),
        "Using JSON file lists"
    );
    let list_a: Arc<dyn ListClient> = Arc::new(list_a);
    let list_b: Arc<dyn ListClient> = Arc::new(list_b);

    let retry = RetryPolicy {
        max_attempts: config.retry_attempts,
        call_timeout: config.call_timeout,
        ..RetryPolicy::default()
    };
    let sync = Arc::new(SyncLoop::new(
        list_a,
        list_b,
        AnchorStore::new(&config.state_file),
        config.policy,
        config.sync_interval,
        retry,
    ));
    tracing::info!(state_file = %sync.store().path().display(), "Anchor store ready");
    let loop_handle = sync.start();

    if config.webserver {
        let state = AppState { sync: sync.clone() };

        // Build router
        let app = Router::new()
            .merge(routes::create_routes())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(state);

        // Start server
        let addr = format!("0.0.0.0:{}", config.webserver_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Status server listening on {}", addr);

        let shutdown = sync.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown.stop();
            })
            .await?;
    } else {
        tokio::signal::ctrl_c().await?;
        sync.stop();
    }

    tracing::info!("Shutting down, waiting for the current cycle");
    loop_handle.await?;

    Ok(())
}
