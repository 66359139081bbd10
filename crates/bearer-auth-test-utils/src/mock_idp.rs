//! Mock identity provider for integration tests
//!
//! Serves an OIDC discovery document and a JWKS endpoint from a wiremock
//! server. The JWKS response can be swapped to simulate key rotation,
//! cache headers and outages.

use crate::crypto_fixtures::TestKeypair;
use bearer_auth::auth::{
    ClaimsFactory, JwksCache, JwtValidator, OidcDiscovery, ProviderClaims, ValidationContext,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the discovery document.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Path of the JWKS document.
pub const JWKS_PATH: &str = "/keys";

/// Audience used by [`MockIdp::validator`] unless told otherwise.
pub const TEST_AUDIENCE: &str = "api://bearer-auth-tests";

/// Wiremock-backed identity provider.
///
/// # Example
/// ```rust,ignore
/// let key = TestKeypair::ed25519(1, "k1")?;
/// let idp = MockIdp::start().await;
/// idp.publish(&[&key], None).await;
///
/// let validator = idp.validator::<OidcClaims>(TEST_AUDIENCE).await?;
/// ```
pub struct MockIdp {
    server: MockServer,
}

impl MockIdp {
    /// Start the server and mount the discovery document.
    pub async fn start() -> Self {
        let idp = Self {
            server: MockServer::start().await,
        };
        idp.mount_discovery().await;
        idp
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn discovery_url(&self) -> String {
        format!("{}{DISCOVERY_PATH}", self.server.uri())
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}{JWKS_PATH}", self.server.uri())
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Replace every mounted response with the discovery document and a
    /// JWKS containing `keys`, optionally with a `Cache-Control` header.
    pub async fn publish(&self, keys: &[&TestKeypair], cache_control: Option<&str>) {
        let jwks = json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() });
        self.publish_document(jwks, cache_control).await;
    }

    /// Like [`MockIdp::publish`] but with a raw JWKS document.
    pub async fn publish_document(&self, jwks: Value, cache_control: Option<&str>) {
        let mut response = ResponseTemplate::new(200).set_body_json(jwks);
        if let Some(value) = cache_control {
            response = response.insert_header("cache-control", value);
        }
        self.replace_jwks_response(response).await;
    }

    /// Make the JWKS endpoint answer with `status` and no body.
    pub async fn fail_jwks(&self, status: u16) {
        self.replace_jwks_response(ResponseTemplate::new(status))
            .await;
    }

    /// Delay every JWKS response by `delay`.
    pub async fn publish_slowly(&self, keys: &[&TestKeypair], delay: Duration) {
        let jwks = json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() });
        self.replace_jwks_response(ResponseTemplate::new(200).set_body_json(jwks).set_delay(delay))
            .await;
    }

    /// Number of JWKS requests received so far.
    pub async fn jwks_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == JWKS_PATH)
            .count()
    }

    /// Resolve discovery, register the JWKS endpoint with a fresh cache
    /// and build a validator with a one second refresh floor.
    pub async fn validator<C: ProviderClaims + Default>(
        &self,
        audience: &str,
    ) -> anyhow::Result<Arc<JwtValidator<C>>> {
        self.validator_with::<C>(audience, Duration::from_secs(1), ClaimsFactory::default())
            .await
    }

    pub async fn validator_with<C: ProviderClaims>(
        &self,
        audience: &str,
        min_refresh_interval: Duration,
        claims_factory: ClaimsFactory<C>,
    ) -> anyhow::Result<Arc<JwtValidator<C>>> {
        let metadata = OidcDiscovery::new().resolve(&self.discovery_url()).await?;

        let cache = Arc::new(JwksCache::new());
        cache
            .register(&metadata.jwks_uri, min_refresh_interval)
            .await;

        let context = ValidationContext::new(metadata.issuer, audience, metadata.jwks_uri);
        Ok(Arc::new(JwtValidator::new(cache, context, claims_factory)))
    }

    async fn mount_discovery(&self) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer(),
                "jwks_uri": self.jwks_uri(),
                "id_token_signing_alg_values_supported": ["EdDSA", "ES256", "RS256"],
            })))
            .mount(&self.server)
            .await;
    }

    async fn replace_jwks_response(&self, response: ResponseTemplate) {
        // reset() also forgets recorded requests, so counts restart at 0
        self.server.reset().await;
        self.mount_discovery().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}
