//! Axum HTTP server for the admin API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::LoadBalancerController;
use crate::{Error, Result};

use super::handlers;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LoadBalancerController>,
}

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

pub fn router(state: AppState) -> Router {
    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/quit", get(handlers::quit).post(handlers::quit))
        .route("/api/v1/loadbalancers", get(handlers::list_load_balancers))
        .route(
            "/api/v1/loadbalancers/{name}",
            get(handlers::get_load_balancer),
        );
    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve the admin API on `port` until the process exits.
pub async fn run_server(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Admin API listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
