//! Bearer token validation.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The token's `alg` is pinned to the resolved key: it must equal the
//!   key's declared `alg`, and must belong to the key type's family.
//!   Symmetric algorithms and `none` are never accepted
//! - Signature is verified before any claim is trusted
//! - A fresh claims instance is built per call by the claims factory
//! - Generic error messages reach clients; details are logged at debug

use crate::auth::claims::{ClaimsFactory, ProviderClaims};
use crate::auth::jwks::{Jwk, JwksCache};
use crate::errors::AuthError;
use crate::observability::metrics;
use common::jwt::{extract_header, validate_time_claims_at, DEFAULT_LEEWAY};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Per-authenticator configuration. Immutable once built and shared
/// read-only by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    /// Expected `iss`, compared exactly.
    pub issuer: String,
    /// Audience that `aud` must contain.
    pub audience: String,
    /// Symmetric tolerance for `exp`, `nbf` and `iat`.
    pub leeway: Duration,
    /// Endpoint whose keys sign tokens for this issuer.
    pub jwks_uri: String,
}

impl ValidationContext {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway: DEFAULT_LEEWAY,
            jwks_uri: jwks_uri.into(),
        }
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

/// Result of a successful validation.
#[derive(Clone)]
pub struct ValidatedToken<C> {
    pub claims: C,
    /// `kid` of the key that verified the signature.
    pub key_id: String,
    pub algorithm: Algorithm,
    pub signature_verified: bool,
}

impl<C: fmt::Debug> fmt::Debug for ValidatedToken<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedToken")
            .field("claims", &self.claims)
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("signature_verified", &self.signature_verified)
            .finish()
    }
}

/// JWT validator backed by a [`JwksCache`].
///
/// Stateless apart from its immutable context: safe to call concurrently.
pub struct JwtValidator<C> {
    cache: Arc<JwksCache>,
    context: Arc<ValidationContext>,
    claims_factory: ClaimsFactory<C>,
}

impl<C: ProviderClaims> JwtValidator<C> {
    /// Create a new validator.
    ///
    /// `context.jwks_uri` must be registered with `cache`.
    pub fn new(
        cache: Arc<JwksCache>,
        context: ValidationContext,
        claims_factory: ClaimsFactory<C>,
    ) -> Self {
        Self {
            cache,
            context: Arc::new(context),
            claims_factory,
        }
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    pub fn cache(&self) -> &Arc<JwksCache> {
        &self.cache
    }

    /// Validate a bearer token against the current time.
    ///
    /// # Security Checks
    ///
    /// 1. Size check and header parse; `kid` required
    /// 2. Key lookup (one forced JWKS refresh on an unknown `kid`)
    /// 3. Algorithm pinning against the key
    /// 4. Signature verification
    /// 5. Issuer, exact match
    /// 6. Audience membership
    /// 7. `exp` / `nbf` / `iat` with leeway
    ///
    /// # Errors
    ///
    /// Every failure maps to one `AuthError` variant; see [`AuthError::kind`].
    #[instrument(skip_all)]
    pub async fn validate(&self, token: &str) -> Result<ValidatedToken<C>, AuthError> {
        self.validate_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Same as [`JwtValidator::validate`] with an explicit `now` (Unix
    /// seconds) for the time-claim checks.
    pub async fn validate_at(
        &self,
        token: &str,
        now: i64,
    ) -> Result<ValidatedToken<C>, AuthError> {
        let started = Instant::now();
        let result = self.verify(token, now).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_token_validation(outcome, started.elapsed());

        result
    }

    async fn verify(&self, token: &str, now: i64) -> Result<ValidatedToken<C>, AuthError> {
        // 1. Header (includes size check via common::jwt)
        let header = extract_header(token).map_err(|e| {
            tracing::debug!(target: "auth.jwt", error = ?e, "Token header extraction failed");
            AuthError::from(e)
        })?;

        // 2. Key lookup
        let jwk = self
            .cache
            .get_key(&self.context.jwks_uri, &header.kid)
            .await?;

        // 3. Algorithm pinning
        let algorithm = pin_algorithm(&header.alg, &jwk)?;

        // 4. Signature
        let decoding_key = decoding_key(&jwk)?;
        let payload = verify_signature(token, &decoding_key, algorithm)?;

        // Fresh claims instance for this call only
        let claims = self.claims_factory.build(payload).map_err(|e| {
            tracing::debug!(target: "auth.jwt", error = %e, "Token claims did not deserialize");
            AuthError::MalformedToken(format!("invalid claims: {e}"))
        })?;

        // 5. Issuer
        if !claims.verify_issuer(&self.context) {
            let iss = claims.registered().iss.clone();
            tracing::debug!(target: "auth.jwt", iss = %iss, expected = %self.context.issuer, "Token issuer mismatch");
            return Err(AuthError::InvalidIssuer(iss));
        }

        // 6. Audience
        if !claims.verify_audience(&self.context) {
            let aud = claims.presented_audience().join(",");
            tracing::debug!(target: "auth.jwt", aud = %aud, expected = %self.context.audience, "Token audience mismatch");
            return Err(AuthError::InvalidAudience(aud));
        }

        // 7. Time claims
        let registered = claims.registered();
        validate_time_claims_at(
            registered.exp,
            registered.nbf,
            registered.iat,
            self.context.leeway,
            now,
        )?;

        tracing::debug!(target: "auth.jwt", kid = %header.kid, alg = ?algorithm, "Token validated successfully");

        Ok(ValidatedToken {
            claims,
            key_id: header.kid,
            algorithm,
            signature_verified: true,
        })
    }
}

/// Algorithms a key may verify, from its type and curve.
fn key_family(jwk: &Jwk) -> &'static [Algorithm] {
    match (jwk.kty.as_str(), jwk.crv.as_deref()) {
        ("RSA", _) => &[
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ],
        ("EC", Some("P-256")) => &[Algorithm::ES256],
        ("EC", Some("P-384")) => &[Algorithm::ES384],
        ("OKP", Some("Ed25519")) => &[Algorithm::EdDSA],
        _ => &[],
    }
}

/// Pin the token's declared algorithm to the resolved key.
///
/// Runs even when the key declares no `alg`: the key type still decides.
fn pin_algorithm(token_alg: &str, jwk: &Jwk) -> Result<Algorithm, AuthError> {
    let family = key_family(jwk);
    let allowed = || match &jwk.alg {
        Some(alg) => alg.clone(),
        None => family
            .iter()
            .map(|a| format!("{a:?}"))
            .collect::<Vec<_>>()
            .join("|"),
    };
    let mismatch = |reason: &str| {
        tracing::warn!(
            target: "auth.jwt",
            token_alg = %token_alg,
            key_alg = ?jwk.alg,
            kty = %jwk.kty,
            reason = reason,
            "Token algorithm rejected for key"
        );
        AuthError::AlgorithmMismatch {
            token: token_alg.to_string(),
            allowed: allowed(),
        }
    };

    if let Some(key_alg) = &jwk.alg {
        if key_alg != token_alg {
            return Err(mismatch("differs from key alg"));
        }
    }

    let algorithm =
        Algorithm::from_str(token_alg).map_err(|_| mismatch("unsupported algorithm"))?;

    if !family.contains(&algorithm) {
        return Err(mismatch("not valid for key type"));
    }

    Ok(algorithm)
}

/// Build a decoding key from the JWK's public parameters.
fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    let missing = |param: &str| {
        tracing::error!(target: "auth.jwt", kid = ?jwk.kid, kty = %jwk.kty, param = param, "JWK missing public parameter");
        AuthError::SignatureInvalid
    };

    let result = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or_else(|| missing("n"))?;
            let e = jwk.e.as_deref().ok_or_else(|| missing("e"))?;
            DecodingKey::from_rsa_components(n, e)
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
            let y = jwk.y.as_deref().ok_or_else(|| missing("y"))?;
            DecodingKey::from_ec_components(x, y)
        }
        "OKP" => {
            let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
            DecodingKey::from_ed_components(x)
        }
        other => {
            tracing::error!(target: "auth.jwt", kty = %other, "Unsupported JWK key type");
            return Err(AuthError::SignatureInvalid);
        }
    };

    result.map_err(|e| {
        tracing::error!(target: "auth.jwt", kid = ?jwk.kid, error = %e, "Invalid JWK public key");
        AuthError::SignatureInvalid
    })
}

/// Verify the signature and return the payload. Claim checks are done by
/// the caller, so every built-in claim validation is switched off.
fn verify_signature(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<serde_json::Value, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    decode::<serde_json::Value>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(target: "auth.jwt", error = %e, "Token verification failed");
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AuthError::MalformedToken(e.to_string()),
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    AuthError::AlgorithmMismatch {
                        token: format!("{algorithm:?}"),
                        allowed: format!("{algorithm:?}"),
                    }
                }
                _ => AuthError::SignatureInvalid,
            }
        })
}
