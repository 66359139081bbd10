//! HTTP middleware.

pub mod auth;

pub use auth::{authenticate, extract_bearer_token, AuthState, Authenticated, ClaimsExt};
