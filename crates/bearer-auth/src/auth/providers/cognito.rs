//! Amazon Cognito user pools.
//!
//! ID tokens carry the app client in `aud`; access tokens have no `aud`
//! and carry it in `client_id` instead.

use crate::auth::claims::{ProviderClaims, RegisteredClaims};
use crate::auth::jwt::ValidationContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Issuer for a user pool.
pub fn issuer(region: &str, pool_id: &str) -> String {
    format!("https://cognito-idp.{region}.amazonaws.com/{pool_id}")
}

/// Discovery URL for a user pool.
pub fn discovery_url(region: &str, pool_id: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer(region, pool_id)
    )
}

/// Region prefix of a pool id (`us-east-1_AbCdEf` -> `us-east-1`).
pub fn region_from_pool_id(pool_id: &str) -> Option<&str> {
    pool_id
        .split_once('_')
        .map(|(region, _)| region)
        .filter(|region| !region.is_empty())
}

/// Cognito ID/access token claims.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CognitoClaims {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, rename = "cognito:username")]
    pub username: Option<String>,

    /// Group memberships; used as roles.
    #[serde(default, rename = "cognito:groups")]
    pub groups: Vec<String>,

    /// "id" or "access".
    #[serde(default)]
    pub token_use: Option<String>,

    /// App client id (access tokens only).
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl CognitoClaims {
    pub fn is_access_token(&self) -> bool {
        self.token_use.as_deref() == Some("access")
    }
}

impl fmt::Debug for CognitoClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoClaims")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username.as_ref().map(|_| "[REDACTED]"))
            .field("groups", &self.groups)
            .field("token_use", &self.token_use)
            .field("client_id", &self.client_id)
            .field("registered", &self.registered)
            .finish()
    }
}

impl ProviderClaims for CognitoClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }

    fn verify_audience(&self, ctx: &ValidationContext) -> bool {
        if self.is_access_token() {
            self.client_id.as_deref() == Some(ctx.audience.as_str())
        } else {
            self.registered.aud.contains(&ctx.audience)
        }
    }

    fn presented_audience(&self) -> Vec<String> {
        if self.is_access_token() {
            self.client_id.iter().cloned().collect()
        } else {
            self.registered
                .aud
                .values()
                .into_iter()
                .map(str::to_string)
                .collect()
        }
    }

    fn roles(&self) -> &[String] {
        &self.groups
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref().or(self.username.as_deref())
    }
}
