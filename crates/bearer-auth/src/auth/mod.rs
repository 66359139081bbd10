//! Authentication core: discovery, key cache, validation, claims.

pub mod claims;
pub mod discovery;
pub mod jwks;
pub mod jwt;
pub mod providers;

pub use claims::{ClaimsFactory, ProviderClaims, RegisteredClaims, SubjectId};
pub use discovery::{OidcDiscovery, ProviderMetadata};
pub use jwks::{Jwk, JwksCache, JwksCacheConfig, KeySet};
pub use jwt::{JwtValidator, ValidatedToken, ValidationContext};
