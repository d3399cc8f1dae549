//! Thin HTTP façade: health, community reads and fire-and-forget resyncs.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use sqlx::MySqlPool;
use tokio::sync::watch;

use crate::error::{Result, WatcherError};
use crate::ingest::ProcessingFailures;
use crate::providers::Provider;

#[derive(Clone)]
pub struct AppState {
    pub pool: MySqlPool,
    pub providers: Arc<Vec<Arc<dyn Provider>>>,
    pub failures: ProcessingFailures,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health))
        .route("/provider/{key}", get(handlers::get_provider_data))
        .route("/sync/{provider_type}/{key}", get(handlers::sync_by_provider))
        .with_state(state)
}

/// Serve the façade until the shutdown signal flips.
pub async fn serve(state: AppState, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    const OP: &str = "server:serve";

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WatcherError::upstream(OP, e.to_string()))?;
    tracing::info!(%addr, "http facade listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| WatcherError::upstream(OP, e.to_string()))
}
