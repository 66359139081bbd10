//! Metrics definitions for the bearer-token verifier.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bearer_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: `success` or one of the `AuthError::kind()` labels
//! - `status`: 2 values (success, error)
//! - `jwks_uri`: one value per registered endpoint (set at startup)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return its render handle.
///
/// # Errors
///
/// Fails if bucket configuration is rejected or a recorder is already
/// installed in this process.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Validation is in-memory once keys are cached; keep sub-millisecond resolution
        .set_buckets_for_metric(
            Matcher::Prefix("bearer_auth_token_validation".to_string()),
            &[
                0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.010, 0.050, 0.250, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        // JWKS refresh includes retries with backoff
        .set_buckets_for_metric(
            Matcher::Prefix("bearer_auth_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token validation.
///
/// Metric: `bearer_auth_token_validations_total`,
/// `bearer_auth_token_validation_duration_seconds`
/// Labels: `outcome`
pub fn record_token_validation(outcome: &'static str, duration: Duration) {
    histogram!("bearer_auth_token_validation_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());

    counter!("bearer_auth_token_validations_total",
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Record a JWKS refresh attempt (all retries included).
///
/// Metric: `bearer_auth_jwks_refresh_total`,
/// `bearer_auth_jwks_refresh_duration_seconds`
/// Labels: `status`
pub fn record_jwks_refresh(status: &'static str, duration: Duration) {
    histogram!("bearer_auth_jwks_refresh_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("bearer_auth_jwks_refresh_total",
        "status" => status
    )
    .increment(1);
}

/// Set the number of keys currently cached for an endpoint.
///
/// Metric: `bearer_auth_jwks_keys`
/// Labels: `jwks_uri`
pub fn set_jwks_keys(jwks_uri: &str, count: usize) {
    gauge!("bearer_auth_jwks_keys",
        "jwks_uri" => jwks_uri.to_string()
    )
    .set(count as f64);
}
