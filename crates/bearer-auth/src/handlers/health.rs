//! Health check handlers.
//!
//! - `/health`: Liveness probe, plus a view of the cached key sets
//! - `/ready`: Readiness probe, 503 until every JWKS endpoint has keys

use crate::auth::jwks::EndpointStatus;
use crate::auth::ProviderClaims;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Body for `/health` and `/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jwks: Vec<EndpointStatus>,
}

/// Liveness probe handler.
///
/// Always 200 while the process is serving. Key-set status is reported
/// but does not affect the status code.
#[tracing::instrument(skip_all, name = "bearer_auth.health.liveness")]
pub async fn health_check<C: ProviderClaims>(
    State(state): State<Arc<AppState<C>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        jwks: state.validator.cache().status().await,
    })
}

/// Readiness probe handler.
///
/// Returns 503 while any registered endpoint has never produced a key set.
/// A stale set still counts as ready: it keeps being served.
#[tracing::instrument(skip_all, name = "bearer_auth.health.readiness")]
pub async fn readiness_check<C: ProviderClaims>(
    State(state): State<Arc<AppState<C>>>,
) -> impl IntoResponse {
    let jwks = state.validator.cache().status().await;
    let ready = !jwks.is_empty() && jwks.iter().all(|endpoint| endpoint.ready);

    if ready {
        (StatusCode::OK, Json(HealthResponse { status: "ready", jwks }))
    } else {
        tracing::warn!(target: "bearer_auth.health", "Readiness check failed: signing keys not loaded");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready",
                jwks,
            }),
        )
    }
}
