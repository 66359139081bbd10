//! Authentication middleware.
//!
//! Annotates requests with the caller's identity; it never denies a request
//! for lack of one. Requests without a bearer token pass through untouched.
//! Requests with a token are validated: on success the [`ValidatedToken`] is
//! stored in the request extensions, on failure the request is answered
//! with the error and the inner handler is not called.
//!
//! Handlers that require a caller use the [`Authenticated`] extractor.

use crate::auth::{JwtValidator, ProviderClaims, ValidatedToken};
use crate::errors::AuthError;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
pub struct AuthState<C> {
    pub validator: Arc<JwtValidator<C>>,
}

impl<C> Clone for AuthState<C> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. Returns `None` when the header
/// is absent, not valid UTF-8, uses another scheme, or has an empty token.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Authentication middleware that validates bearer tokens when present.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - No token: continues to the next handler unauthenticated
/// - Valid token: continues with `ValidatedToken<C>` in extensions
/// - Invalid token: 401 (503 when signing keys are unavailable)
#[instrument(skip_all, name = "auth.middleware")]
pub async fn authenticate<C: ProviderClaims>(
    State(state): State<Arc<AuthState<C>>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(req.headers()).map(str::to_owned) else {
        tracing::debug!(target: "auth.middleware", "No bearer token, continuing unauthenticated");
        return next.run(req).await;
    };

    match state.validator.validate(&token).await {
        Ok(validated) => {
            tracing::debug!(target: "auth.middleware", kid = %validated.key_id, "Request authenticated");
            req.extensions_mut().insert(validated);
            next.run(req).await
        }
        Err(err) => {
            log_rejection(&err, &state.validator);
            err.into_response()
        }
    }
}

fn log_rejection<C: ProviderClaims>(err: &AuthError, validator: &JwtValidator<C>) {
    let ctx = validator.context();
    match err {
        AuthError::InvalidIssuer(iss) => tracing::error!(
            target: "auth.middleware",
            error_kind = err.kind(),
            issuer = %iss,
            expected_issuer = %ctx.issuer,
            "Bearer token rejected"
        ),
        AuthError::InvalidAudience(aud) => tracing::error!(
            target: "auth.middleware",
            error_kind = err.kind(),
            audience = %aud,
            expected_audience = %ctx.audience,
            "Bearer token rejected"
        ),
        _ => tracing::error!(
            target: "auth.middleware",
            error_kind = err.kind(),
            error = %err,
            "Bearer token rejected"
        ),
    }
}

/// Extension trait for reading the validated token from a request.
pub trait ClaimsExt {
    /// `None` when the request is unauthenticated.
    fn validated_token<C: ProviderClaims>(&self) -> Option<&ValidatedToken<C>>;
}

impl<B> ClaimsExt for axum::extract::Request<B> {
    fn validated_token<C: ProviderClaims>(&self) -> Option<&ValidatedToken<C>> {
        self.extensions().get::<ValidatedToken<C>>()
    }
}

/// Extractor for handlers that require an authenticated caller.
///
/// Rejects with `AuthError::Unauthenticated` (401) when the middleware did
/// not attach a token. Use `Option<Authenticated<C>>` for optional auth.
#[derive(Debug, Clone)]
pub struct Authenticated<C>(pub ValidatedToken<C>);

#[axum::async_trait]
impl<S, C> FromRequestParts<S> for Authenticated<C>
where
    S: Send + Sync,
    C: ProviderClaims,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ValidatedToken<C>>()
            .cloned()
            .map(Authenticated)
            .ok_or(AuthError::Unauthenticated)
    }
}
