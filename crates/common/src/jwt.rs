//! JWT utilities shared by the bearer-token verifier.
//!
//! This module holds the parts of token verification that need no network
//! and no key material:
//! - Size limits for DoS prevention
//! - Leeway constants for time-based claim checks
//! - Untrusted header parsing (`kid`, `alg`)
//! - The `aud` claim, which may be a string or an array
//! - `exp` / `nbf` / `iat` validation with symmetric leeway
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header values are untrusted until the signature has been verified;
//!   they are only used to select a key from a trusted key set
//! - Error messages are generic; details are logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_header, validate_time_claims, DEFAULT_LEEWAY};
//!
//! let header = extract_header(token)?;
//! let key = key_set.get(&header.kid)?;
//! // ... verify signature with `key` pinned to `header.alg` ...
//! validate_time_claims(claims.exp, claims.nbf, claims.iat, DEFAULT_LEEWAY)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this are rejected BEFORE any base64 decoding or
/// cryptographic work.
///
/// - Typical identity-provider access tokens are 800-2000 bytes
/// - Tokens carrying large group/role lists stay well below 8KB
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default leeway for time-based claims (10 seconds).
///
/// Absorbs clock drift between the identity provider and this verifier.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(10);

/// Maximum allowed leeway (10 minutes).
///
/// Configuration above this value is rejected.
pub const MAX_LEEWAY: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced by the transport-free JWT helpers.
///
/// Display strings are intentionally generic. Callers map the variants onto
/// their own error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid")]
    MalformedToken,

    /// Token is missing the `kid` header, or it is not a non-empty string.
    #[error("The access token is invalid")]
    MissingKid,

    /// Token `exp` is further in the past than the leeway allows.
    #[error("The access token has expired")]
    Expired,

    /// Token `nbf` or `iat` is further in the future than the leeway allows.
    #[error("The access token is invalid")]
    NotYetValid,
}

// =============================================================================
// Header
// =============================================================================

/// The fields of a JWT header needed to select and pin a verification key.
///
/// Parsed WITHOUT verifying the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Key ID identifying the signing key in the issuer's JWKS.
    pub kid: String,

    /// Algorithm the token claims to be signed with (e.g. "RS256").
    pub alg: String,
}

/// Extract `kid` and `alg` from a JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - The returned values are attacker-controlled; `kid` may only be used as
///   a lookup key into a trusted key set and `alg` must be pinned against
///   the resolved key
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON, or no
///   string `alg`
/// - `MissingKid` - Header has no non-empty string `kid`
pub fn extract_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "Token rejected: missing alg header");
            JwtValidationError::MalformedToken
        })?;

    // Empty kid is rejected the same as a missing one
    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    Ok(TokenHeader { kid, alg })
}

/// Extract only the `kid` from a JWT header.
///
/// # Errors
///
/// Same as [`extract_header`].
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    extract_header(token).map(|header| header.kid)
}

// =============================================================================
// Audience
// =============================================================================

/// The `aud` claim.
///
/// RFC 7519 allows either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "api://my-api"`
    Single(String),
    /// `"aud": ["api://my-api", "other"]`
    Multiple(Vec<String>),
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Multiple(Vec::new())
    }
}

impl Audience {
    /// Exact-match membership test.
    #[must_use]
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Multiple(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    /// All audience values.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Audience::Single(aud) => vec![aud.as_str()],
            Audience::Multiple(auds) => auds.iter().map(String::as_str).collect(),
        }
    }

    /// True when the claim is absent or an empty array.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Audience::Single(_) => false,
            Audience::Multiple(auds) => auds.is_empty(),
        }
    }
}

// =============================================================================
// Time claims
// =============================================================================

/// Validate `exp`, `nbf` and `iat` against the current time with leeway.
///
/// # Errors
///
/// See [`validate_time_claims_at`].
pub fn validate_time_claims(
    exp: i64,
    nbf: Option<i64>,
    iat: Option<i64>,
    leeway: Duration,
) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_time_claims_at(exp, nbf, iat, leeway, now)
}

/// Deterministic time-claim validation against an explicit `now`.
///
/// The leeway is applied symmetrically:
/// - expired when `now > exp + leeway` (a token that expired exactly
///   `leeway` seconds ago is still accepted)
/// - not yet valid when `nbf > now + leeway` or `iat > now + leeway`
///
/// # Errors
///
/// - `Expired` - `exp` is outside the leeway window
/// - `NotYetValid` - `nbf` or `iat` is outside the leeway window
pub fn validate_time_claims_at(
    exp: i64,
    nbf: Option<i64>,
    iat: Option<i64>,
    leeway: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Leeway is bounded by configuration; saturate rather than wrap
    let leeway_secs = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

    if now > exp.saturating_add(leeway_secs) {
        tracing::debug!(
            target: "common.jwt",
            exp = exp,
            now = now,
            leeway_secs = leeway_secs,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    let latest_acceptable = now.saturating_add(leeway_secs);

    if let Some(nbf) = nbf {
        if nbf > latest_acceptable {
            tracing::debug!(
                target: "common.jwt",
                nbf = nbf,
                now = now,
                leeway_secs = leeway_secs,
                "Token rejected: nbf in the future"
            );
            return Err(JwtValidationError::NotYetValid);
        }
    }

    if let Some(iat) = iat {
        if iat > latest_acceptable {
            tracing::debug!(
                target: "common.jwt",
                iat = iat,
                now = now,
                leeway_secs = leeway_secs,
                "Token rejected: iat in the future"
            );
            return Err(JwtValidationError::NotYetValid);
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
