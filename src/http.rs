//! HTTP server for the Prometheus metrics endpoint.
//!
//! Serves `/metrics` for scraping and `/health` with the lifecycle state.

use crate::server::ServerState;
use axum::{Router, extract::State, http::StatusCode, routing::get};
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Handler for GET /health - 200 while the game is online, 503 otherwise.
async fn health_handler(
    State(state): State<watch::Receiver<ServerState>>,
) -> (StatusCode, &'static str) {
    let current = *state.borrow();
    let code = if current == ServerState::Online {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, current.as_str())
}

pub fn router(state: watch::Receiver<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server until `shutdown` is cancelled.
///
/// Binds to `0.0.0.0:port`. Bind failures are logged, not fatal.
pub async fn run_http_server(
    port: u16,
    state: watch::Receiver<ServerState>,
    shutdown: CancellationToken,
) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Prometheus HTTP server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }
}
