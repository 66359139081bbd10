//! Claims types and the per-validation claims factory.
//!
//! A fresh claims value is built for every validation call. The factory
//! makes that structural: the validator never holds a claims instance of
//! its own, it asks the factory for a new one each time.
//!
//! Identifiers (`sub`, email, name) are redacted in Debug output.

use crate::auth::jwt::ValidationContext;
use common::jwt::Audience;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// RFC 7519 registered claims shared by every provider.
///
/// `exp` is required; a token without it is rejected as malformed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    #[serde(default)]
    pub iss: String,

    /// Subject - redacted in Debug output.
    #[serde(default)]
    pub sub: String,

    #[serde(default)]
    pub aud: Audience,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(deserialize_with = "numeric_date::required")]
    pub exp: i64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(
        default,
        deserialize_with = "numeric_date::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(
        default,
        deserialize_with = "numeric_date::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// RFC 7519 NumericDate: integer or fractional seconds, floored to whole
/// seconds.
mod numeric_date {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumericDate {
        Seconds(i64),
        Fractional(f64),
    }

    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    const UPPER: f64 = 9_223_372_036_854_775_808.0;

    fn to_seconds<E: Error>(value: NumericDate) -> Result<i64, E> {
        match value {
            NumericDate::Seconds(secs) => Ok(secs),
            NumericDate::Fractional(secs) => {
                let floored = secs.floor();
                if floored.is_finite() && floored >= -UPPER && floored < UPPER {
                    Ok(floored as i64)
                } else {
                    Err(E::custom("NumericDate out of range"))
                }
            }
        }
    }

    pub(super) fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        to_seconds(NumericDate::deserialize(deserializer)?)
    }

    pub(super) fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Option::<NumericDate>::deserialize(deserializer)?
            .map(to_seconds)
            .transpose()
    }
}

impl fmt::Debug for RegisteredClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("nbf", &self.nbf)
            .field("iat", &self.iat)
            .field("jti", &self.jti)
            .finish()
    }
}

/// Stable identifier for the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum SubjectId {
    Uuid(Uuid),
    /// Providers whose subject is not a UUID.
    Opaque(String),
}

impl SubjectId {
    /// UUID when `value` parses as one, opaque otherwise.
    pub fn parse(value: &str) -> Self {
        Uuid::parse_str(value)
            .map(SubjectId::Uuid)
            .unwrap_or_else(|_| SubjectId::Opaque(value.to_string()))
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            SubjectId::Uuid(id) => Some(*id),
            SubjectId::Opaque(_) => None,
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectId::Uuid(id) => write!(f, "{id}"),
            SubjectId::Opaque(value) => f.write_str(value),
        }
    }
}

/// Capability interface every provider's claims type implements.
///
/// The validator and middleware only talk to claims through this trait.
pub trait ProviderClaims: DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    fn registered(&self) -> &RegisteredClaims;

    /// Exact match against the configured issuer.
    fn verify_issuer(&self, ctx: &ValidationContext) -> bool {
        self.registered().iss == ctx.issuer
    }

    /// `aud` contains the configured audience.
    fn verify_audience(&self, ctx: &ValidationContext) -> bool {
        self.registered().aud.contains(&ctx.audience)
    }

    /// Audience values to report when `verify_audience` fails.
    fn presented_audience(&self) -> Vec<String> {
        self.registered()
            .aud
            .values()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn roles(&self) -> &[String] {
        &[]
    }

    /// Case-insensitive role membership.
    fn has_role(&self, role: &str) -> bool {
        let needle = role.to_uppercase();
        self.roles().iter().any(|r| r.to_uppercase() == needle)
    }

    fn subject_id(&self) -> SubjectId {
        SubjectId::parse(&self.registered().sub)
    }

    fn email(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// Populate this (freshly constructed) instance from a verified payload.
    fn fill(&mut self, payload: serde_json::Value) -> Result<(), serde_json::Error> {
        *self = serde_json::from_value(payload)?;
        Ok(())
    }
}

/// Builds a new claims instance for every validation call.
pub struct ClaimsFactory<C> {
    make: Arc<dyn Fn() -> C + Send + Sync>,
}

impl<C> Clone for ClaimsFactory<C> {
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
        }
    }
}

impl<C> fmt::Debug for ClaimsFactory<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimsFactory")
            .field("claims", &std::any::type_name::<C>())
            .finish()
    }
}

impl<C: ProviderClaims> ClaimsFactory<C> {
    /// Register the constructor, once, at setup time.
    pub fn new(make: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Self {
            make: Arc::new(make),
        }
    }

    /// New instance filled from `payload`.
    pub fn build(&self, payload: serde_json::Value) -> Result<C, serde_json::Error> {
        let mut claims = (self.make)();
        claims.fill(payload)?;
        Ok(claims)
    }
}

impl<C: ProviderClaims + Default> Default for ClaimsFactory<C> {
    fn default() -> Self {
        Self::new(C::default)
    }
}
