//! Authentication error types.
//!
//! Every failure of the verification pipeline maps to exactly one variant so
//! callers (and logs, and metrics) can tell them apart. Client responses are
//! deliberately coarse: an expired token gets its own message, every other
//! token failure gets the same generic one. Details stay server-side.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Realm advertised in `WWW-Authenticate` challenges.
pub const AUTH_REALM: &str = "bearer-auth";

/// Message returned for expired tokens.
pub const EXPIRED_TOKEN_MESSAGE: &str = "The access token has expired";

/// Message returned for every other token failure.
pub const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid";

/// Authentication error type.
///
/// Maps to HTTP status codes:
/// - Discovery: 500 Internal Server Error
/// - KeyFetch: 503 Service Unavailable
/// - everything else: 401 Unauthorized
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// OIDC discovery document unreachable or malformed.
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// No usable key set for the endpoint.
    #[error("Signing keys unavailable: {0}")]
    KeyFetch(String),

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token's `kid` is not in the key set, even after a refresh.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    #[error("Algorithm mismatch: token declares {token}, key allows {allowed}")]
    AlgorithmMismatch { token: String, allowed: String },

    #[error("Signature verification failed")]
    SignatureInvalid,

    /// Carries the offending `iss` value.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Carries the offending `aud` values.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// A handler required an authenticated caller and there was none.
    #[error("Authentication required")]
    Unauthenticated,
}

impl AuthError {
    /// Stable snake_case label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Discovery(_) => "discovery",
            AuthError::KeyFetch(_) => "key_fetch",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::AlgorithmMismatch { .. } => "algorithm_mismatch",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::InvalidIssuer(_) => "invalid_issuer",
            AuthError::InvalidAudience(_) => "invalid_audience",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::Unauthenticated => "unauthenticated",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Discovery(_) => 500,
            AuthError::KeyFetch(_) => 503,
            _ => 401,
        }
    }

    /// True when the token itself was rejected (as opposed to an
    /// infrastructure failure or a missing token).
    pub fn is_token_rejection(&self) -> bool {
        !matches!(
            self,
            AuthError::Discovery(_) | AuthError::KeyFetch(_) | AuthError::Unauthenticated
        )
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge => {
                AuthError::MalformedToken("token exceeds size limit".to_string())
            }
            JwtValidationError::MalformedToken => {
                AuthError::MalformedToken("invalid JWT structure".to_string())
            }
            JwtValidationError::MissingKid => {
                AuthError::MalformedToken("missing kid header".to_string())
            }
            JwtValidationError::Expired => AuthError::TokenExpired,
            JwtValidationError::NotYetValid => AuthError::TokenNotYetValid,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthError::Discovery(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred",
            ),
            AuthError::KeyFetch(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Authentication service temporarily unavailable",
            ),
            AuthError::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                EXPIRED_TOKEN_MESSAGE,
            ),
            AuthError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Authentication required",
            ),
            _ => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                INVALID_TOKEN_MESSAGE,
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // RFC 6750: no error code in the challenge when no credentials were sent
        if status == StatusCode::UNAUTHORIZED {
            let challenge = match &self {
                AuthError::Unauthenticated => format!("Bearer realm=\"{AUTH_REALM}\""),
                AuthError::TokenExpired => format!(
                    "Bearer realm=\"{AUTH_REALM}\", error=\"invalid_token\", error_description=\"{EXPIRED_TOKEN_MESSAGE}\""
                ),
                _ => format!("Bearer realm=\"{AUTH_REALM}\", error=\"invalid_token\""),
            };
            if let Ok(header_value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn token_rejections() -> Vec<AuthError> {
        vec![
            AuthError::MalformedToken("bad".to_string()),
            AuthError::UnknownKey("kid-1".to_string()),
            AuthError::AlgorithmMismatch {
                token: "HS256".to_string(),
                allowed: "RS256".to_string(),
            },
            AuthError::SignatureInvalid,
            AuthError::InvalidIssuer("https://evil/".to_string()),
            AuthError::InvalidAudience("other".to_string()),
            AuthError::TokenNotYetValid,
        ]
    }

    #[test]
    fn test_kinds_are_distinct() {
        let mut all = token_rejections();
        all.extend([
            AuthError::Discovery("x".to_string()),
            AuthError::KeyFetch("x".to_string()),
            AuthError::TokenExpired,
            AuthError::Unauthenticated,
        ]);

        let mut kinds: Vec<&str> = all.iter().map(AuthError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::Discovery("x".to_string()).status_code(), 500);
        assert_eq!(AuthError::KeyFetch("x".to_string()).status_code(), 503);
        assert_eq!(AuthError::TokenExpired.status_code(), 401);
        assert_eq!(AuthError::Unauthenticated.status_code(), 401);
        for err in token_rejections() {
            assert_eq!(err.status_code(), 401, "{err:?}");
        }
    }

    #[test]
    fn test_is_token_rejection() {
        assert!(AuthError::TokenExpired.is_token_rejection());
        assert!(AuthError::SignatureInvalid.is_token_rejection());
        assert!(!AuthError::KeyFetch("x".to_string()).is_token_rejection());
        assert!(!AuthError::Unauthenticated.is_token_rejection());
    }

    #[test]
    fn test_from_jwt_validation_error() {
        assert_eq!(
            AuthError::from(JwtValidationError::Expired),
            AuthError::TokenExpired
        );
        assert_eq!(
            AuthError::from(JwtValidationError::NotYetValid),
            AuthError::TokenNotYetValid
        );
        for err in [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::MalformedToken,
            JwtValidationError::MissingKid,
        ] {
            assert_eq!(AuthError::from(err).kind(), "malformed_token");
        }
    }

    #[tokio::test]
    async fn test_into_response_expired_token() {
        let response = AuthError::TokenExpired.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(www_auth.contains("error=\"invalid_token\""));
        assert!(www_auth.contains(EXPIRED_TOKEN_MESSAGE));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
        assert_eq!(body["error"]["message"], EXPIRED_TOKEN_MESSAGE);
    }

    #[tokio::test]
    async fn test_into_response_rejections_are_indistinguishable() {
        for err in token_rejections() {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "Bearer realm=\"bearer-auth\", error=\"invalid_token\""
            );

            let body = read_body_json(response.into_body()).await;
            assert_eq!(body["error"]["code"], "INVALID_TOKEN");
            assert_eq!(body["error"]["message"], INVALID_TOKEN_MESSAGE);
        }
    }

    #[tokio::test]
    async fn test_into_response_does_not_leak_details() {
        let response = AuthError::InvalidIssuer("https://attacker.example/".to_string())
            .into_response();
        let body = read_body_json(response.into_body()).await;
        assert!(!body.to_string().contains("attacker"));
    }

    #[tokio::test]
    async fn test_into_response_unauthenticated() {
        let response = AuthError::Unauthenticated.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer realm=\"bearer-auth\""
        );
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_into_response_key_fetch() {
        let response = AuthError::KeyFetch("connection refused".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
        assert!(!body.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_into_response_discovery() {
        let response = AuthError::Discovery("404".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }
}
