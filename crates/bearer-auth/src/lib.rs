//! Bearer token authentication service library.
//!
//! Validates OAuth2/OIDC bearer tokens issued by an external identity
//! provider and exposes the authenticated caller to downstream handlers.
//!
//! # Architecture
//!
//! ```text
//! discovery -> jwks cache -> jwt validator -> middleware -> handlers
//! ```
//!
//! # Modules
//!
//! - `auth` - Discovery, JWKS cache, validator, claims and providers
//! - `config` - Service configuration from environment
//! - `errors` - Error type with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Bearer token middleware and extractor
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup
//! - `tasks` - Background tasks

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod tasks;
