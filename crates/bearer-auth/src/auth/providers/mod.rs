//! Provider-specific claims types and endpoint conventions.
//!
//! Each provider supplies its claim fields and role extraction behind
//! [`ProviderClaims`](crate::auth::claims::ProviderClaims); the validator
//! is provider-agnostic.

pub mod cognito;
pub mod entra;
pub mod oidc;

pub use cognito::CognitoClaims;
pub use entra::EntraClaims;
pub use oidc::OidcClaims;
