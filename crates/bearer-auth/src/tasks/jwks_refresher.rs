//! JWKS refresher background task.
//!
//! Periodically refreshes stale key sets so request-path lookups rarely see
//! an expired set. Lookups refresh on their own as well; this task only
//! moves that work off the request path.
//!
//! # Graceful Shutdown
//!
//! The task exits when its cancellation token is cancelled. An in-flight
//! refresh is not interrupted; it finishes on its own task.

use crate::auth::jwks::JwksCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Shortest period the refresher will tick at.
pub const MIN_REFRESH_PERIOD: Duration = Duration::from_millis(100);

/// Start the JWKS refresher loop.
///
/// # Arguments
///
/// * `cache` - Cache whose registered endpoints are refreshed
/// * `period` - How often to look for stale endpoints, raised to
///   [`MIN_REFRESH_PERIOD`] if shorter
/// * `cancel_token` - Token for graceful shutdown
#[instrument(skip_all, name = "auth.task.jwks_refresher")]
pub async fn start_jwks_refresher(
    cache: Arc<JwksCache>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    if period < MIN_REFRESH_PERIOD {
        warn!(
            target: "auth.task.jwks_refresher",
            requested = ?period,
            min = ?MIN_REFRESH_PERIOD,
            "JWKS refresher period too short, using minimum"
        );
    }
    let period = period.max(MIN_REFRESH_PERIOD);

    info!(
        target: "auth.task.jwks_refresher",
        period_secs = period.as_secs(),
        "Starting JWKS refresher task"
    );

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; startup already warmed the cache
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let refreshed = cache.refresh_stale().await;
                debug!(
                    target: "auth.task.jwks_refresher",
                    refreshed = refreshed,
                    "Checked JWKS endpoints for staleness"
                );
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "auth.task.jwks_refresher",
                    "JWKS refresher received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "auth.task.jwks_refresher", "JWKS refresher task stopped");
}
