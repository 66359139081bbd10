//! # Bearer Auth Test Utilities
//!
//! Shared test utilities for the bearer-auth service.
//!
//! This crate provides:
//! - Signing key fixtures (deterministic Ed25519, generated P-256)
//! - Token claim builders (TestTokenBuilder)
//! - Mock identity provider (discovery + JWKS on wiremock)
//! - Server test harness (TestAuthServer for HTTP tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bearer_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let key = TestKeypair::ed25519(1, "k1")?;
//!     let idp = MockIdp::start().await;
//!     idp.publish(&[&key], None).await;
//!
//!     let validator = idp.validator::<OidcClaims>(TEST_AUDIENCE).await?;
//!     let token = key.sign(&TestTokenBuilder::new(&idp.issuer(), TEST_AUDIENCE).build());
//!     assert!(validator.validate(&token).await.is_ok());
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_idp;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_idp::*;
pub use server_harness::*;
pub use token_builders::*;
