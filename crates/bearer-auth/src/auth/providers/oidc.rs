//! Generic OpenID Connect provider.

use crate::auth::claims::{ProviderClaims, RegisteredClaims};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known path of the discovery document, relative to the issuer.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Discovery URL for an issuer (trailing slash on the issuer is ignored).
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{DISCOVERY_PATH}", issuer.trim_end_matches('/'))
}

/// Claims for a standards-compliant OIDC provider.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct OidcClaims {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl fmt::Debug for OidcClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcClaims")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .field("roles", &self.roles)
            .field("registered", &self.registered)
            .finish()
    }
}

impl ProviderClaims for OidcClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
