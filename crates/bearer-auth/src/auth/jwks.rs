//! JWKS cache for one or more identity-provider key endpoints.
//!
//! Each registered `jwks_uri` owns a [`KeySet`] that is replaced wholesale on
//! refresh; readers clone an `Arc` and never see a half-built set.
//!
//! # Refresh rules
//!
//! - No key set yet: the caller fetches synchronously (cold start).
//! - Server freshness elapsed: the current set is served and a refresh runs
//!   in the background.
//! - Unknown `kid`: one forced refresh (key rotation).
//! - All of the above are rate limited by the endpoint's minimum refresh
//!   interval, whatever the server's cache headers say.
//! - At most one fetch per endpoint is in flight. It runs on its own task,
//!   so a caller that gives up waiting does not cancel it for others.
//! - A failed refresh keeps serving the previous set. With no previous set
//!   the caller gets `AuthError::KeyFetch`.

use crate::errors::AuthError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::retry::RetryPolicy;
use reqwest::header::{HeaderMap, CACHE_CONTROL, EXPIRES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Default minimum interval between fetches of one endpoint.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Freshness used when the server sends no cache headers (5 minutes).
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(300);

/// Upper bound on server-declared freshness (24 hours).
pub const MAX_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

/// Timeout for a single JWKS request.
pub const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON Web Key (RFC 7517) with the public parameters for RSA, EC and OKP keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type: "RSA", "EC" or "OKP".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is meant for (e.g. "RS256"). Optional in RFC 7517.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use ("sig" or "enc").
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve for EC ("P-256", "P-384") and OKP ("Ed25519") keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate, or the OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document. Keys are decoded one by one so a single unsupported
/// entry does not poison the whole set.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// Immutable key set fetched from one endpoint.
#[derive(Debug)]
pub struct KeySet {
    source: String,
    keys: HashMap<String, Jwk>,
}

impl KeySet {
    /// Build a key set, keeping only signing keys that carry a `kid`.
    /// On duplicate `kid`s the first key wins.
    pub fn new(source: impl Into<String>, jwks: Vec<Jwk>) -> Self {
        let source = source.into();
        let mut keys = HashMap::with_capacity(jwks.len());

        for jwk in jwks {
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }
            let Some(kid) = jwk.kid.clone().filter(|k| !k.is_empty()) else {
                tracing::debug!(target: "auth.jwks", source = %source, kty = %jwk.kty, "Skipping JWK without kid");
                continue;
            };
            if keys.contains_key(&kid) {
                tracing::warn!(target: "auth.jwks", source = %source, kid = %kid, "Duplicate kid in JWKS, keeping first");
                continue;
            }
            keys.insert(kid, jwk);
        }

        Self { source, keys }
    }

    /// The JWKS URL this set was fetched from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key IDs in this set, sorted.
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }
}

/// Tuning for [`JwksCache`].
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// Timeout for each HTTP request.
    pub fetch_timeout: Duration,
    /// Retry policy for transient fetch failures.
    pub retry: RetryPolicy,
    /// Freshness when the server sends no cache headers.
    pub default_freshness: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: JWKS_FETCH_TIMEOUT,
            retry: RetryPolicy::default(),
            default_freshness: DEFAULT_FRESHNESS,
        }
    }
}

/// Operational view of one endpoint, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub jwks_uri: String,
    /// A key set has been fetched at least once.
    pub ready: bool,
    pub key_count: usize,
    /// Server-declared freshness has elapsed.
    pub stale: bool,
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid JWKS document: {0}")]
    Decode(String),
}

impl FetchError {
    /// Transport errors, 429 and 5xx are worth another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(status) => *status == 429 || (500..600).contains(status),
            FetchError::Decode(_) => false,
        }
    }
}

struct FetchedKeys {
    keys: Vec<Jwk>,
    freshness: Option<Duration>,
}

#[derive(Default)]
struct EntryState {
    keys: Option<Arc<KeySet>>,
    /// Completed refresh attempts, successful or not.
    attempts: u64,
    last_attempt: Option<Instant>,
    fresh_until: Option<Instant>,
    last_error: Option<String>,
}

impl EntryState {
    fn is_stale(&self, now: Instant) -> bool {
        self.fresh_until.map_or(true, |until| now >= until)
    }

    fn floor_elapsed(&self, now: Instant, min_refresh_interval: Duration) -> bool {
        self.last_attempt
            .map_or(true, |at| now.saturating_duration_since(at) >= min_refresh_interval)
    }

    fn unavailable(&self) -> AuthError {
        AuthError::KeyFetch(
            self.last_error
                .clone()
                .unwrap_or_else(|| "no key set fetched yet".to_string()),
        )
    }
}

struct CacheEntry {
    jwks_uri: String,
    min_refresh_interval: Duration,
    state: RwLock<EntryState>,
    /// Held for the whole duration of a fetch.
    refresh_guard: Arc<Mutex<()>>,
}

/// Performs fetches and publishes their result into a [`CacheEntry`].
#[derive(Clone)]
struct JwksFetcher {
    http_client: reqwest::Client,
    retry: RetryPolicy,
    default_freshness: Duration,
}

impl JwksFetcher {
    fn new(config: &JwksCacheConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            retry: config.retry,
            default_freshness: config.default_freshness,
        }
    }

    async fn fetch_once(&self, jwks_uri: &str) -> Result<FetchedKeys, FetchError> {
        let response = self
            .http_client
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let freshness = freshness_from_headers(response.headers(), Utc::now());

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let keys = document
            .keys
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
                Ok(jwk) => Some(jwk),
                Err(e) => {
                    tracing::warn!(target: "auth.jwks", error = %e, "Skipping undecodable JWK");
                    None
                }
            })
            .collect();

        Ok(FetchedKeys { keys, freshness })
    }

    /// Fetch with retries and publish the outcome. Returns the set now being
    /// served, which is the previous one if the fetch failed.
    #[instrument(skip_all, fields(jwks_uri = %entry.jwks_uri))]
    async fn refresh(&self, entry: &CacheEntry) -> Result<Arc<KeySet>, AuthError> {
        tracing::debug!(target: "auth.jwks", "Fetching JWKS");

        let started = Instant::now();
        let result = self
            .retry
            .run(
                "jwks_fetch",
                || self.fetch_once(&entry.jwks_uri),
                FetchError::is_retryable,
            )
            .await;
        let elapsed = started.elapsed();

        let mut state = entry.state.write().await;
        let now = Instant::now();
        state.attempts += 1;
        state.last_attempt = Some(now);

        match result {
            Ok(fetched) => {
                let freshness = effective_freshness(
                    fetched.freshness,
                    self.default_freshness,
                    entry.min_refresh_interval,
                );
                let key_set = Arc::new(KeySet::new(entry.jwks_uri.clone(), fetched.keys));

                if key_set.is_empty() {
                    tracing::warn!(target: "auth.jwks", "JWKS contains no usable signing keys");
                }
                tracing::info!(
                    target: "auth.jwks",
                    key_count = key_set.len(),
                    fresh_for_secs = freshness.as_secs(),
                    "JWKS cache refreshed"
                );

                metrics::record_jwks_refresh("success", elapsed);
                metrics::set_jwks_keys(&entry.jwks_uri, key_set.len());

                state.keys = Some(Arc::clone(&key_set));
                state.fresh_until = Some(now + freshness);
                state.last_error = None;
                Ok(key_set)
            }
            Err(e) => {
                metrics::record_jwks_refresh("error", elapsed);
                state.last_error = Some(e.to_string());

                match &state.keys {
                    Some(stale) => {
                        tracing::error!(
                            target: "auth.jwks",
                            error = %e,
                            key_count = stale.len(),
                            "JWKS refresh failed, serving stale key set"
                        );
                        Ok(Arc::clone(stale))
                    }
                    None => {
                        tracing::error!(
                            target: "auth.jwks",
                            error = %e,
                            "JWKS fetch failed and no key set is cached"
                        );
                        Err(AuthError::KeyFetch(e.to_string()))
                    }
                }
            }
        }
    }
}

/// Cache of signing keys for registered JWKS endpoints.
///
/// Safe to share across tasks behind an `Arc`.
pub struct JwksCache {
    fetcher: JwksFetcher,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    pub fn new() -> Self {
        Self::with_config(JwksCacheConfig::default())
    }

    pub fn with_config(config: JwksCacheConfig) -> Self {
        Self {
            fetcher: JwksFetcher::new(&config),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking `jwks_uri`. No-op if it is already registered; the
    /// original interval is kept in that case.
    pub async fn register(&self, jwks_uri: &str, min_refresh_interval: Duration) {
        let mut entries = self.entries.write().await;
        if entries.contains_key(jwks_uri) {
            tracing::debug!(target: "auth.jwks", jwks_uri = %jwks_uri, "JWKS endpoint already registered");
            return;
        }

        entries.insert(
            jwks_uri.to_string(),
            Arc::new(CacheEntry {
                jwks_uri: jwks_uri.to_string(),
                min_refresh_interval,
                state: RwLock::new(EntryState::default()),
                refresh_guard: Arc::new(Mutex::new(())),
            }),
        );

        tracing::info!(
            target: "auth.jwks",
            jwks_uri = %jwks_uri,
            min_refresh_secs = min_refresh_interval.as_secs(),
            "Registered JWKS endpoint"
        );
    }

    /// Current key set for `jwks_uri`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeyFetch` if the endpoint is not registered or no
    /// key set has ever been fetched successfully.
    #[instrument(skip(self))]
    pub async fn get(&self, jwks_uri: &str) -> Result<Arc<KeySet>, AuthError> {
        let entry = self.entry(jwks_uri).await?;
        let now = Instant::now();

        let (keys, stale, due, attempts) = {
            let state = entry.state.read().await;
            (
                state.keys.clone(),
                state.is_stale(now),
                state.floor_elapsed(now, entry.min_refresh_interval),
                state.attempts,
            )
        };

        match keys {
            Some(keys) => {
                if stale && due {
                    self.spawn_background_fetch(&entry);
                }
                Ok(keys)
            }
            None if due => self.refresh_entry(&entry, attempts).await,
            None => {
                tracing::debug!(target: "auth.jwks", "Cold-start fetch suppressed by min refresh interval");
                Err(entry.state.read().await.unavailable())
            }
        }
    }

    /// Look up a key by `kid`, forcing one refresh on a miss.
    ///
    /// # Errors
    ///
    /// - `AuthError::KeyFetch` - no key set available
    /// - `AuthError::UnknownKey` - `kid` not found, even after a refresh
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, jwks_uri: &str, kid: &str) -> Result<Jwk, AuthError> {
        let keys = self.get(jwks_uri).await?;
        if let Some(jwk) = keys.get(kid) {
            tracing::debug!(target: "auth.jwks", kid = %kid, "JWKS cache hit");
            return Ok(jwk.clone());
        }

        // Possible key rotation
        let entry = self.entry(jwks_uri).await?;
        let (due, attempts) = {
            let state = entry.state.read().await;
            (
                state.floor_elapsed(Instant::now(), entry.min_refresh_interval),
                state.attempts,
            )
        };

        if due {
            tracing::debug!(target: "auth.jwks", kid = %kid, "Key not in cache, forcing refresh");
            let refreshed = self.refresh_entry(&entry, attempts).await?;
            if let Some(jwk) = refreshed.get(kid) {
                return Ok(jwk.clone());
            }
        }

        tracing::warn!(target: "auth.jwks", kid = %kid, refreshed = due, "Key not found in JWKS");
        Err(AuthError::UnknownKey(kid.to_string()))
    }

    /// Refresh every endpoint that is stale (or has never loaded) and whose
    /// min refresh interval has elapsed. Returns how many endpoints were
    /// left with a usable key set.
    pub async fn refresh_stale(&self) -> usize {
        let entries: Vec<Arc<CacheEntry>> = self.entries.read().await.values().cloned().collect();
        let mut refreshed = 0;

        for entry in entries {
            let now = Instant::now();
            let (due, attempts) = {
                let state = entry.state.read().await;
                (
                    state.is_stale(now) && state.floor_elapsed(now, entry.min_refresh_interval),
                    state.attempts,
                )
            };
            if due && self.refresh_entry(&entry, attempts).await.is_ok() {
                refreshed += 1;
            }
        }

        refreshed
    }

    /// Snapshot of every registered endpoint, sorted by URI.
    pub async fn status(&self) -> Vec<EndpointStatus> {
        let entries: Vec<Arc<CacheEntry>> = self.entries.read().await.values().cloned().collect();
        let now = Instant::now();
        let mut statuses = Vec::with_capacity(entries.len());

        for entry in entries {
            let state = entry.state.read().await;
            statuses.push(EndpointStatus {
                jwks_uri: entry.jwks_uri.clone(),
                ready: state.keys.is_some(),
                key_count: state.keys.as_ref().map_or(0, |keys| keys.len()),
                stale: state.is_stale(now),
            });
        }

        statuses.sort_by(|a, b| a.jwks_uri.cmp(&b.jwks_uri));
        statuses
    }

    /// Periodically call [`JwksCache::refresh_stale`] until `cancel_token`
    /// is cancelled.
    pub fn spawn_background_refresh(
        self: &Arc<Self>,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(crate::tasks::jwks_refresher::start_jwks_refresher(
            Arc::clone(self),
            period,
            cancel_token,
        ))
    }

    async fn entry(&self, jwks_uri: &str) -> Result<Arc<CacheEntry>, AuthError> {
        self.entries
            .read()
            .await
            .get(jwks_uri)
            .cloned()
            .ok_or_else(|| {
                tracing::error!(target: "auth.jwks", jwks_uri = %jwks_uri, "JWKS endpoint not registered");
                AuthError::KeyFetch(format!("JWKS endpoint {jwks_uri} is not registered"))
            })
    }

    /// Run one fetch for `entry`, or join the one that completed while we
    /// waited for the guard. `observed_attempts` is the attempt count the
    /// caller saw before deciding to refresh.
    async fn refresh_entry(
        &self,
        entry: &Arc<CacheEntry>,
        observed_attempts: u64,
    ) -> Result<Arc<KeySet>, AuthError> {
        let guard = Arc::clone(&entry.refresh_guard).lock_owned().await;

        {
            let state = entry.state.read().await;
            if state.attempts != observed_attempts {
                return state.keys.clone().ok_or_else(|| state.unavailable());
            }
        }

        let fetcher = self.fetcher.clone();
        let task_entry = Arc::clone(entry);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            fetcher.refresh(&task_entry).await
        });

        handle.await.map_err(|e| {
            tracing::error!(target: "auth.jwks", error = %e, "JWKS refresh task failed");
            AuthError::KeyFetch("refresh task failed".to_string())
        })?
    }

    /// Start a refresh unless one is already in flight.
    fn spawn_background_fetch(&self, entry: &Arc<CacheEntry>) {
        let Ok(guard) = Arc::clone(&entry.refresh_guard).try_lock_owned() else {
            return;
        };

        let fetcher = self.fetcher.clone();
        let entry = Arc::clone(entry);
        tokio::spawn(async move {
            let _guard = guard;
            let now = Instant::now();
            let due = {
                let state = entry.state.read().await;
                state.is_stale(now) && state.floor_elapsed(now, entry.min_refresh_interval)
            };
            if due {
                // Failures are logged and the stale set stays in place
                let _ = fetcher.refresh(&entry).await;
            }
        });
    }
}

/// Server-declared freshness of a JWKS response, if any.
///
/// `Cache-Control: no-cache`/`no-store` mean zero, then `max-age`, then
/// `Expires` (an unparsable `Expires` counts as already expired).
pub(crate) fn freshness_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(cache_control) = headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()) {
        let mut max_age = None;
        for directive in cache_control.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            if directive == "no-cache" || directive == "no-store" {
                return Some(Duration::ZERO);
            }
            if let Some(value) = directive.strip_prefix("max-age=") {
                if let Ok(secs) = value.trim_matches('"').parse::<u64>() {
                    max_age = Some(Duration::from_secs(secs));
                }
            }
        }
        if max_age.is_some() {
            return max_age;
        }
    }

    let expires = headers.get(EXPIRES)?;
    let expires_at = expires
        .to_str()
        .ok()
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok());

    Some(match expires_at {
        Some(at) => at
            .with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO),
        None => Duration::ZERO,
    })
}

/// Apply the default, the 24h cap and the min-refresh floor.
pub(crate) fn effective_freshness(
    hint: Option<Duration>,
    default_freshness: Duration,
    min_refresh_interval: Duration,
) -> Duration {
    hint.unwrap_or(default_freshness)
        .min(MAX_FRESHNESS)
        .max(min_refresh_interval)
}
