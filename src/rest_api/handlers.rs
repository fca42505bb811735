//! HTTP handlers for the admin API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info, instrument};

use super::dto::{ErrorResponse, LoadBalancerDetailResponse, LoadBalancerListResponse};
use super::server::AppState;
use crate::error::Error;

/// Liveness probe
pub async fn healthz() -> &'static str {
    "ok"
}

/// Stop the controller in the background; `main` exits once it finishes.
#[instrument(skip(state))]
pub async fn quit(State(state): State<AppState>) -> (StatusCode, &'static str) {
    info!("Quit requested over the admin API");
    let controller = state.controller.clone();
    tokio::spawn(async move {
        if let Err(e) = controller.stop().await {
            error!("Shutdown failed: {}", e);
        }
    });
    (StatusCode::ACCEPTED, "shutting down")
}

/// Cached pipeline state of every load balancer
pub async fn list_load_balancers(State(state): State<AppState>) -> Json<LoadBalancerListResponse> {
    let items = state.controller.cluster().l7_pool.statuses();
    let total = items.len();
    Json(LoadBalancerListResponse { items, total })
}

#[instrument(skip(state), fields(name = %name))]
pub async fn get_load_balancer(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<LoadBalancerDetailResponse>, (StatusCode, Json<ErrorResponse>)> {
    let pool = &state.controller.cluster().l7_pool;
    match pool.get(&name).await {
        Ok(load_balancer) => {
            let status = pool.statuses().into_iter().find(|r| r.name == name);
            Ok(Json(LoadBalancerDetailResponse {
                load_balancer,
                status,
            }))
        }
        Err(e) if e.is_not_found() => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("Load balancer {} not found", name),
            )),
        )),
        Err(e @ Error::MissingDependency { .. }) => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("not_linked", &e.to_string())),
        )),
        Err(e) => {
            error!("Failed to get load balancer {}: {:?}", name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
