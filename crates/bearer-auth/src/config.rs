//! Service configuration.
//!
//! Configuration is loaded from environment variables. Tenant and pool
//! identifiers are redacted in Debug output.
//!
//! Only the binary reads the environment; the auth core takes explicit
//! parameters.

use crate::auth::jwks::DEFAULT_MIN_REFRESH_INTERVAL;
use crate::auth::providers::{cognito, entra, oidc};
use common::jwt::{DEFAULT_LEEWAY, MAX_LEEWAY};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default period of the proactive JWKS staleness check in seconds.
pub const DEFAULT_JWKS_BACKGROUND_REFRESH_SECONDS: u64 = 300;

/// Default graceful shutdown drain period in seconds.
pub const DEFAULT_DRAIN_SECONDS: u64 = 5;

/// Identity provider flavour; selects the claims type and URL derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Entra,
    Cognito,
    Oidc,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entra" => Ok(Provider::Entra),
            "cognito" => Ok(Provider::Cognito),
            "oidc" => Ok(Provider::Oidc),
            _ => Err(ConfigError::InvalidProvider(format!(
                "AUTH_PROVIDER must be one of entra, cognito, oidc, got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provider::Entra => "entra",
            Provider::Cognito => "cognito",
            Provider::Oidc => "oidc",
        })
    }
}

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    pub provider: Provider,

    /// Audience tokens must be issued for.
    pub audience: String,

    /// Discovery document URL, given or derived from the provider settings.
    pub discovery_url: String,

    /// Expected issuer. `None` means "use the discovery document's issuer".
    pub issuer: Option<String>,

    /// Entra tenant id - redacted in Debug output.
    pub tenant_id: Option<String>,

    /// Cognito user pool id - redacted in Debug output.
    pub cognito_pool_id: Option<String>,

    pub leeway_seconds: u64,

    /// Minimum interval between JWKS fetches per endpoint.
    pub jwks_min_refresh_seconds: u64,

    /// Period of the background staleness check.
    pub jwks_background_refresh_seconds: u64,

    /// Graceful shutdown drain period (0 disables draining).
    pub drain_seconds: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("provider", &self.provider)
            .field("audience", &self.audience)
            .field("discovery_url", &self.discovery_url)
            .field("issuer", &self.issuer)
            .field("tenant_id", &self.tenant_id.as_ref().map(|_| "[REDACTED]"))
            .field(
                "cognito_pool_id",
                &self.cognito_pool_id.as_ref().map(|_| "[REDACTED]"),
            )
            .field("leeway_seconds", &self.leeway_seconds)
            .field("jwks_min_refresh_seconds", &self.jwks_min_refresh_seconds)
            .field(
                "jwks_background_refresh_seconds",
                &self.jwks_background_refresh_seconds,
            )
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid provider configuration: {0}")]
    InvalidProvider(String),

    #[error("Invalid JWT leeway configuration: {0}")]
    InvalidLeeway(String),

    #[error("Invalid JWKS refresh configuration: {0}")]
    InvalidRefreshInterval(String),

    #[error("Invalid Cognito pool configuration: {0}")]
    InvalidCognitoPoolId(String),

    #[error("Invalid drain period configuration: {0}")]
    InvalidDrainPeriod(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let provider = match vars.get("AUTH_PROVIDER") {
            Some(value) => value.parse()?,
            None => Provider::Oidc,
        };

        let audience = non_empty(vars, "AUTH_AUD")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_AUD".to_string()))?;

        let explicit_discovery_url = non_empty(vars, "AUTH_DISCOVERY_URL");
        let explicit_issuer = non_empty(vars, "AUTH_ISSUER");

        let mut tenant_id = None;
        let mut cognito_pool_id = None;

        let (discovery_url, issuer) = match provider {
            Provider::Entra => {
                let tenant = non_empty(vars, "AUTH_TENANT_ID")
                    .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_TENANT_ID".to_string()))?;
                let version = non_empty(vars, "AUTH_ENTRA_VERSION")
                    .unwrap_or_else(|| entra::DEFAULT_VERSION.to_string());

                let discovery_url = explicit_discovery_url
                    .unwrap_or_else(|| entra::discovery_url(&tenant, &version));
                let issuer = explicit_issuer.unwrap_or_else(|| entra::issuer(&tenant));
                tenant_id = Some(tenant);
                (discovery_url, Some(issuer))
            }
            Provider::Cognito => {
                let pool = non_empty(vars, "AUTH_COGNITO_POOL_ID").ok_or_else(|| {
                    ConfigError::MissingEnvVar("AUTH_COGNITO_POOL_ID".to_string())
                })?;
                let region = match non_empty(vars, "AUTH_COGNITO_REGION") {
                    Some(region) => region,
                    None => cognito::region_from_pool_id(&pool)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            ConfigError::InvalidCognitoPoolId(
                                "AUTH_COGNITO_POOL_ID must look like '<region>_<id>'".to_string(),
                            )
                        })?,
                };

                let discovery_url = explicit_discovery_url
                    .unwrap_or_else(|| cognito::discovery_url(&region, &pool));
                let issuer = explicit_issuer.unwrap_or_else(|| cognito::issuer(&region, &pool));
                cognito_pool_id = Some(pool);
                (discovery_url, Some(issuer))
            }
            Provider::Oidc => {
                // A bare issuer is enough: discovery lives at a well-known path
                let discovery_url = match (explicit_discovery_url, &explicit_issuer) {
                    (Some(url), _) => url,
                    (None, Some(issuer)) => oidc::discovery_url(issuer),
                    (None, None) => {
                        return Err(ConfigError::MissingEnvVar(
                            "AUTH_DISCOVERY_URL".to_string(),
                        ))
                    }
                };
                (discovery_url, explicit_issuer)
            }
        };

        let leeway_seconds = if let Some(value_str) = vars.get("JWT_LEEWAY_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidLeeway(format!(
                    "JWT_LEEWAY_SECONDS must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })?;

            if value > MAX_LEEWAY.as_secs() {
                return Err(ConfigError::InvalidLeeway(format!(
                    "JWT_LEEWAY_SECONDS must not exceed {} seconds, got {value}",
                    MAX_LEEWAY.as_secs()
                )));
            }

            value
        } else {
            DEFAULT_LEEWAY.as_secs()
        };

        let jwks_min_refresh_seconds = parse_positive(
            vars,
            "JWKS_MIN_REFRESH_SECONDS",
            DEFAULT_MIN_REFRESH_INTERVAL.as_secs(),
        )?;

        let jwks_background_refresh_seconds = parse_positive(
            vars,
            "JWKS_BACKGROUND_REFRESH_SECONDS",
            DEFAULT_JWKS_BACKGROUND_REFRESH_SECONDS,
        )?;

        let drain_seconds = match vars.get("DRAIN_SECONDS") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidDrainPeriod(format!(
                    "DRAIN_SECONDS must be a valid non-negative integer, got '{value_str}': {e}"
                ))
            })?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        Ok(Config {
            bind_address,
            provider,
            audience,
            discovery_url,
            issuer,
            tenant_id,
            cognito_pool_id,
            leeway_seconds,
            jwks_min_refresh_seconds,
            jwks_background_refresh_seconds,
            drain_seconds,
        })
    }

    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_seconds)
    }

    pub fn jwks_min_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_min_refresh_seconds)
    }

    pub fn jwks_background_refresh_period(&self) -> Duration {
        Duration::from_secs(self.jwks_background_refresh_seconds)
    }

    pub fn drain_period(&self) -> Duration {
        Duration::from_secs(self.drain_seconds)
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidRefreshInterval(format!(
            "{key} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidRefreshInterval(format!(
            "{key} must be greater than 0"
        )));
    }

    Ok(value)
}
