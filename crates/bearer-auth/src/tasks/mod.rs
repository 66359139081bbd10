//! Background tasks.

pub mod jwks_refresher;
