//! OIDC discovery.
//!
//! Resolves a provider's `jwks_uri` and `issuer` from its
//! `/.well-known/openid-configuration` document. Runs once at startup, so
//! there are no retries: a failure here is fatal to whoever depends on it.

use crate::errors::AuthError;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Request timeout for the discovery document.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The parts of a discovery document the verifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub jwks_uri: String,
    pub issuer: String,
}

/// Wire shape. Fields are optional so a missing field is reported as a
/// discovery error rather than a generic decode failure.
#[derive(Deserialize)]
struct DiscoveryDocument {
    #[serde(default)]
    jwks_uri: Option<String>,
    #[serde(default)]
    issuer: Option<String>,
}

/// Fetches OIDC discovery documents.
#[derive(Clone)]
pub struct OidcDiscovery {
    http_client: reqwest::Client,
}

impl Default for OidcDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl OidcDiscovery {
    pub fn new() -> Self {
        Self::with_timeout(DISCOVERY_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.discovery", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self { http_client }
    }

    /// Fetch and validate the discovery document at `discovery_url`.
    ///
    /// Dropping the returned future aborts the request.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Discovery` when the document cannot be fetched,
    /// the response is not HTTP 200, the body is not JSON, or `jwks_uri` /
    /// `issuer` are missing or empty.
    #[instrument(skip(self), fields(url = %discovery_url))]
    pub async fn resolve(&self, discovery_url: &str) -> Result<ProviderMetadata, AuthError> {
        let response = self
            .http_client
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "auth.discovery", error = %e, "Failed to fetch discovery document");
                AuthError::Discovery(format!("error downloading {discovery_url}: {e}"))
            })?;

        if response.status() != reqwest::StatusCode::OK {
            tracing::error!(
                target: "auth.discovery",
                status = %response.status(),
                "Discovery endpoint returned non-200 status"
            );
            return Err(AuthError::Discovery(format!(
                "error downloading {discovery_url}: {}",
                response.status()
            )));
        }

        let document: DiscoveryDocument = response.json().await.map_err(|e| {
            tracing::error!(target: "auth.discovery", error = %e, "Failed to parse discovery document");
            AuthError::Discovery(format!("error decoding {discovery_url}: {e}"))
        })?;

        let jwks_uri = required_field(document.jwks_uri, "jwks_uri", discovery_url)?;
        let issuer = required_field(document.issuer, "issuer", discovery_url)?;

        tracing::info!(
            target: "auth.discovery",
            jwks_uri = %jwks_uri,
            issuer = %issuer,
            "Resolved OIDC provider metadata"
        );

        Ok(ProviderMetadata { jwks_uri, issuer })
    }
}

fn required_field(
    value: Option<String>,
    name: &str,
    discovery_url: &str,
) -> Result<String, AuthError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => {
            tracing::error!(target: "auth.discovery", field = name, "Discovery document missing required field");
            Err(AuthError::Discovery(format!(
                "{discovery_url} is missing required field {name}"
            )))
        }
    }
}
