//! Builder patterns for test token claims
//!
//! Provides a fluent API for creating token payloads.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Default subject used by [`TestTokenBuilder`].
pub const TEST_SUBJECT: &str = "7b0a5f2c-1f0e-4c36-9d59-2d3f6b8f1a11";

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new(idp.issuer(), "api://bearer-auth")
///     .for_subject("alice")
///     .with_claim("roles", json!(["Admin"]))
///     .expires_in(3600)
///     .build();
/// let token = keypair.sign(&claims);
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Claims valid for one hour, issued now.
    pub fn new(issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(issuer));
        claims.insert("sub".to_string(), json!(TEST_SUBJECT));
        claims.insert("aud".to_string(), json!(audience));
        claims.insert("exp".to_string(), json!((now + Duration::hours(1)).timestamp()));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        Self { claims }
    }

    pub fn for_subject(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// `aud` as an array.
    pub fn with_audiences(self, audiences: &[&str]) -> Self {
        self.with_claim("aud", json!(audiences))
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at((Utc::now() + Duration::seconds(seconds)).timestamp())
    }

    pub fn expires_at(self, timestamp: i64) -> Self {
        self.with_claim("exp", json!(timestamp))
    }

    pub fn not_before(self, timestamp: i64) -> Self {
        self.with_claim("nbf", json!(timestamp))
    }

    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    /// Set any claim, replacing an existing value.
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn without_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}
