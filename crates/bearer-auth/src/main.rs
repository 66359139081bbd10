//! Bearer Auth
//!
//! Entry point for the bearer token authentication service.
//! Resolves the identity provider, warms the signing key cache and serves
//! the authenticated API.

use bearer_auth::auth::providers::{CognitoClaims, EntraClaims, OidcClaims};
use bearer_auth::auth::{
    ClaimsFactory, JwksCache, JwtValidator, OidcDiscovery, ProviderClaims, ValidationContext,
};
use bearer_auth::config::{Config, Provider};
use bearer_auth::observability::metrics::init_metrics_recorder;
use bearer_auth::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bearer_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bearer-auth");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        provider = %config.provider,
        bind_address = %config.bind_address,
        discovery_url = %config.discovery_url,
        leeway_seconds = config.leeway_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    // Discovery failure is fatal: without a JWKS URI no token can be verified
    let metadata = OidcDiscovery::new()
        .resolve(&config.discovery_url)
        .await
        .map_err(|e| {
            error!("Failed to resolve provider metadata: {}", e);
            e
        })?;

    let issuer = config
        .issuer
        .clone()
        .unwrap_or_else(|| metadata.issuer.clone());

    info!(
        issuer = %issuer,
        jwks_uri = %metadata.jwks_uri,
        "Provider metadata resolved"
    );

    let cache = Arc::new(JwksCache::new());
    cache
        .register(&metadata.jwks_uri, config.jwks_min_refresh_interval())
        .await;

    // Warm the cache; a failure here is retried on the first request
    match cache.get(&metadata.jwks_uri).await {
        Ok(keys) => info!(key_count = keys.len(), "Signing keys loaded"),
        Err(e) => error!("Initial JWKS fetch failed, serving with cold cache: {}", e),
    }

    let cancel_token = CancellationToken::new();
    let refresher = cache.spawn_background_refresh(
        config.jwks_background_refresh_period(),
        cancel_token.child_token(),
    );

    let context = ValidationContext::new(issuer, config.audience.clone(), metadata.jwks_uri)
        .with_leeway(config.leeway());

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let served = match config.provider {
        Provider::Entra => {
            serve::<EntraClaims>(addr, cache, context, metrics_handle, config.drain_period())
                .await
        }
        Provider::Cognito => {
            serve::<CognitoClaims>(addr, cache, context, metrics_handle, config.drain_period())
                .await
        }
        Provider::Oidc => {
            serve::<OidcClaims>(addr, cache, context, metrics_handle, config.drain_period())
                .await
        }
    };

    cancel_token.cancel();
    if let Err(e) = refresher.await {
        warn!("JWKS refresher task ended abnormally: {}", e);
    }

    served?;
    info!("bearer-auth shutdown complete");

    Ok(())
}

async fn serve<C: ProviderClaims + Default>(
    addr: SocketAddr,
    cache: Arc<JwksCache>,
    context: ValidationContext,
    metrics_handle: PrometheusHandle,
    drain_period: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let validator = Arc::new(JwtValidator::new(
        cache,
        context,
        ClaimsFactory::<C>::default(),
    ));
    let app = routes::build_routes(Arc::new(AppState { validator }), metrics_handle);

    info!("bearer-auth listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_period))
    .await?;

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal(drain_period: Duration) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_period.is_zero() {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    } else {
        warn!("Draining connections for {} seconds...", drain_period.as_secs());
        tokio::time::sleep(drain_period).await;
        info!("Drain period complete");
    }
}
