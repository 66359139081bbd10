//! Current caller handler.
//!
//! Returns the authenticated caller's identity from the validated token.

use crate::auth::ProviderClaims;
use crate::middleware::Authenticated;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

/// Response for `/v1/me` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// UUID when the provider issues one, opaque subject otherwise.
    pub subject_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub roles: Vec<String>,

    pub issuer: String,

    /// Token expiration timestamp.
    pub exp: i64,
}

impl MeResponse {
    pub fn from_claims<C: ProviderClaims>(claims: &C) -> Self {
        let registered = claims.registered();
        Self {
            subject_id: claims.subject_id().to_string(),
            email: claims.email().map(str::to_string),
            name: claims.name().map(str::to_string),
            roles: claims.roles().to_vec(),
            issuer: registered.iss.clone(),
            exp: registered.exp,
        }
    }
}

/// Handler for GET /v1/me
///
/// Anonymous callers get 401 from the [`Authenticated`] extractor.
///
/// ```json
/// {
///   "subject_id": "7b0a5f2c-1f0e-4c36-9d59-2d3f6b8f1a11",
///   "email": "ada@example.com",
///   "roles": ["Admin"],
///   "issuer": "https://idp.example/",
///   "exp": 1700000060
/// }
/// ```
#[instrument(skip_all, name = "bearer_auth.handlers.me")]
pub async fn get_me<C: ProviderClaims>(
    Authenticated(token): Authenticated<C>,
) -> Json<MeResponse> {
    tracing::debug!(target: "bearer_auth.handlers.me", kid = %token.key_id, "Returning caller identity");
    Json(MeResponse::from_claims(&token.claims))
}
