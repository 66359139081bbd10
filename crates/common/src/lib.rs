//! Transport-free building blocks shared by the bearer-token verifier.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (header parsing, audience, time claims)
pub mod jwt;

/// Module for bounded retry with exponential backoff
pub mod retry;
