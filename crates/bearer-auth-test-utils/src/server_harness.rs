//! Test server harness
//!
//! Provides TestAuthServer for serving the real router on a random port.

use bearer_auth::auth::{JwtValidator, ProviderClaims};
use bearer_auth::observability::metrics::init_metrics_recorder;
use bearer_auth::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running bearer-auth server for end-to-end tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestAuthServer::spawn(validator).await?;
/// let response = reqwest::Client::new()
///     .get(format!("{}/v1/me", server.url()))
///     .bearer_auth(token)
///     .send()
///     .await?;
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Bind to 127.0.0.1:0 and serve the routes in the background.
    pub async fn spawn<C: ProviderClaims>(
        validator: Arc<JwtValidator<C>>,
    ) -> Result<Self, anyhow::Error> {
        // The global recorder can only be installed once per process; later
        // servers get a standalone handle
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        };

        let app = routes::build_routes(Arc::new(AppState { validator }), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self { addr, handle })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for TestAuthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
