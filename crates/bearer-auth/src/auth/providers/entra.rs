//! Microsoft Entra ID (Azure AD).
//!
//! Discovery lives under `login.microsoftonline.com/<tenant>/`, with a
//! version segment for anything but v1.0. Access tokens requested through
//! MSAL.js are v1.0 tokens, issued by `sts.windows.net`.

use crate::auth::claims::{ProviderClaims, RegisteredClaims, SubjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Base URL for Entra login endpoints.
pub const LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

/// Default token/discovery version.
pub const DEFAULT_VERSION: &str = "v1.0";

/// Discovery URL for a tenant.
///
/// ```
/// use bearer_auth::auth::providers::entra::discovery_url;
///
/// assert_eq!(
///     discovery_url("contoso", "v2.0"),
///     "https://login.microsoftonline.com/contoso/v2.0/.well-known/openid-configuration"
/// );
/// ```
pub fn discovery_url(tenant_id: &str, version: &str) -> String {
    let mut url = format!("{LOGIN_BASE_URL}/{tenant_id}/");
    if !version.is_empty() && version != DEFAULT_VERSION {
        url.push_str(version);
        url.push('/');
    }
    url.push_str(".well-known/openid-configuration");
    url
}

/// Issuer of v1.0 access tokens for a tenant.
pub fn issuer(tenant_id: &str) -> String {
    format!("https://sts.windows.net/{tenant_id}/")
}

/// Entra access/ID token claims.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EntraClaims {
    #[serde(default)]
    pub email: Option<String>,

    /// v1.0 tokens often carry the sign-in name here instead of `email`.
    #[serde(default)]
    pub upn: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Object id of the principal in the tenant.
    #[serde(default)]
    pub oid: Option<String>,

    /// Tenant id.
    #[serde(default)]
    pub tid: Option<String>,

    /// App roles assigned to the principal.
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl fmt::Debug for EntraClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntraClaims")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("upn", &self.upn.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .field("oid", &self.oid.as_ref().map(|_| "[REDACTED]"))
            .field("tid", &self.tid)
            .field("roles", &self.roles)
            .field("registered", &self.registered)
            .finish()
    }
}

impl ProviderClaims for EntraClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }

    fn roles(&self) -> &[String] {
        &self.roles
    }

    /// The `oid` as a UUID; falls back to `sub` when `oid` is absent or
    /// not a UUID.
    fn subject_id(&self) -> SubjectId {
        self.oid
            .as_deref()
            .and_then(|oid| Uuid::parse_str(oid).ok())
            .map(SubjectId::Uuid)
            .unwrap_or_else(|| SubjectId::parse(&self.registered.sub))
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref().or(self.upn.as_deref())
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
