//! HTTP routes.
//!
//! Defines the Axum router and application state.

use crate::auth::{JwtValidator, ProviderClaims};
use crate::handlers;
use crate::middleware::{authenticate, AuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout applied to every route.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
pub struct AppState<C> {
    /// Validator for the configured provider; also owns the JWKS cache.
    pub validator: Arc<JwtValidator<C>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe plus key-set status - public
/// - `/ready` - Readiness probe (keys loaded) - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/v1/me` - Current caller - requires a valid bearer token
///
/// Every route under the auth layer sees `ValidatedToken<C>` in its request
/// extensions when the caller presented a valid token. The layer itself
/// never rejects anonymous requests; handlers opt in via `Authenticated<C>`.
pub fn build_routes<C: ProviderClaims>(
    state: Arc<AppState<C>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let auth_state = Arc::new(AuthState {
        validator: Arc::clone(&state.validator),
    });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check::<C>))
        .route("/ready", get(handlers::readiness_check::<C>))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let authenticated_routes = Router::new()
        .route("/v1/me", get(handlers::get_me::<C>))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            authenticate::<C>,
        ));

    apply_service_layers(
        public_routes
            .merge(metrics_routes)
            .merge(authenticated_routes),
    )
}

/// Wrap `router` in the layers every route is served behind.
///
/// Layer order (bottom-to-top execution):
/// 1. CatchPanicLayer - Panic in a handler becomes a 500 (innermost)
/// 2. TimeoutLayer - Timeout the request
/// 3. TraceLayer - Log request details (outermost)
pub fn apply_service_layers(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
