//! JWKS cache integration tests: discovery, refresh policy, key rotation,
//! stale serving and cold-start failures.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use bearer_auth::auth::providers::OidcClaims;
use bearer_auth::auth::{ClaimsFactory, JwksCache, JwksCacheConfig, OidcDiscovery};
use bearer_auth::errors::AuthError;
use bearer_auth_test_utils::*;
use common::retry::RetryPolicy;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn fast_retry_config() -> JwksCacheConfig {
    JwksCacheConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
        },
        ..JwksCacheConfig::default()
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_resolves_mock_idp() -> anyhow::Result<()> {
    let idp = MockIdp::start().await;

    let metadata = OidcDiscovery::new().resolve(&idp.discovery_url()).await?;

    assert_eq!(metadata.issuer, idp.issuer());
    assert_eq!(metadata.jwks_uri, idp.jwks_uri());
    Ok(())
}

#[tokio::test]
async fn test_discovery_failure_is_discovery_error() -> anyhow::Result<()> {
    let idp = MockIdp::start().await;

    let result = OidcDiscovery::new()
        .resolve(&format!("{}/missing", idp.issuer()))
        .await;

    assert!(matches!(result, Err(AuthError::Discovery(_))));
    Ok(())
}

// ============================================================================
// Fetch and cache
// ============================================================================

#[tokio::test]
async fn test_key_set_is_cached() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], Some("max-age=600")).await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    let first = cache.get(&idp.jwks_uri()).await?;
    let second = cache.get(&idp.jwks_uri()).await?;

    assert_eq!(first.kids(), vec!["k1"]);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_get_key_returns_published_jwk() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], None).await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    let jwk = cache.get_key(&idp.jwks_uri(), "k1").await?;

    assert_eq!(jwk.kty, "OKP");
    assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
    assert_eq!(jwk.alg.as_deref(), Some("EdDSA"));
    assert_eq!(jwk.x.as_deref(), key.jwk()["x"].as_str());
    Ok(())
}

#[tokio::test]
async fn test_undecodable_and_encryption_keys_are_skipped() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let mut enc = TestKeypair::ed25519(2, "enc-1")?.jwk();
    enc["use"] = json!("enc");

    let idp = MockIdp::start().await;
    idp.publish_document(
        json!({"keys": [key.jwk(), enc, {"kid": "no-kty"}, 42]}),
        None,
    )
    .await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    let keys = cache.get(&idp.jwks_uri()).await?;
    assert_eq!(keys.kids(), vec!["k1"]);
    Ok(())
}

#[tokio::test]
async fn test_status_reports_endpoints() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], None).await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    let before = cache.status().await;
    assert_eq!(before.len(), 1);
    assert!(!before[0].ready);

    cache.get(&idp.jwks_uri()).await?;

    let after = cache.status().await;
    assert!(after[0].ready);
    assert_eq!(after[0].key_count, 1);
    assert!(!after[0].stale);
    Ok(())
}

// ============================================================================
// Key rotation
// ============================================================================

#[tokio::test]
async fn test_unknown_kid_then_rotation_validates() -> anyhow::Result<()> {
    let old = TestKeypair::ed25519(1, "k1")?;
    let new = TestKeypair::ed25519(2, "k2")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&old], None).await;

    let validator = idp
        .validator_with(TEST_AUDIENCE, Duration::ZERO, ClaimsFactory::<OidcClaims>::default())
        .await?;
    let claims = TestTokenBuilder::new(&idp.issuer(), TEST_AUDIENCE).build();

    assert!(validator.validate(&old.sign(&claims)).await.is_ok());

    // k2 not published yet: one forced refresh, still unknown
    assert_eq!(
        validator.validate(&new.sign(&claims)).await.unwrap_err(),
        AuthError::UnknownKey("k2".to_string())
    );

    // Provider rotates; the same token now validates after a forced refresh
    idp.publish(&[&old, &new], None).await;
    assert!(validator.validate(&new.sign(&claims)).await.is_ok());
    assert_eq!(idp.jwks_requests().await, 1);

    // Known kids keep being served from cache
    assert!(validator.validate(&old.sign(&claims)).await.is_ok());
    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_refresh_respects_min_interval() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let stranger = TestKeypair::ed25519(2, "nope")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], None).await;

    let validator = idp
        .validator_with(
            TEST_AUDIENCE,
            Duration::from_secs(60),
            ClaimsFactory::<OidcClaims>::default(),
        )
        .await?;
    let claims = TestTokenBuilder::new(&idp.issuer(), TEST_AUDIENCE).build();

    assert!(validator.validate(&key.sign(&claims)).await.is_ok());

    // Flood of unknown kids must not turn into a flood of JWKS requests
    for _ in 0..5 {
        assert!(matches!(
            validator.validate(&stranger.sign(&claims)).await,
            Err(AuthError::UnknownKey(_))
        ));
    }

    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

// ============================================================================
// Freshness and failures
// ============================================================================

#[tokio::test]
async fn test_stale_set_served_while_refresh_fails() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], Some("no-cache")).await;

    let cache = Arc::new(JwksCache::with_config(fast_retry_config()));
    cache.register(&idp.jwks_uri(), Duration::ZERO).await;
    let initial = cache.get(&idp.jwks_uri()).await?;
    assert!(cache.status().await[0].stale);

    idp.fail_jwks(503).await;

    // Stale set is returned immediately; refresh runs in the background
    let served = cache.get(&idp.jwks_uri()).await?;
    assert!(Arc::ptr_eq(&initial, &served));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(idp.jwks_requests().await >= 1);

    let still_served = cache.get_key(&idp.jwks_uri(), "k1").await?;
    assert_eq!(still_served.kid.as_deref(), Some("k1"));
    assert!(cache.status().await[0].ready);
    Ok(())
}

#[tokio::test]
async fn test_stale_set_replaced_by_background_refresh() -> anyhow::Result<()> {
    let old = TestKeypair::ed25519(1, "k1")?;
    let new = TestKeypair::ed25519(2, "k2")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&old], Some("max-age=0")).await;

    let cache = Arc::new(JwksCache::new());
    cache.register(&idp.jwks_uri(), Duration::ZERO).await;
    cache.get(&idp.jwks_uri()).await?;

    idp.publish(&[&new], Some("max-age=600")).await;

    // Triggers the background refresh and still sees the old set
    let served = cache.get(&idp.jwks_uri()).await?;
    assert_eq!(served.kids(), vec!["k1"]);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let refreshed = cache.get(&idp.jwks_uri()).await?;
    assert_eq!(refreshed.kids(), vec!["k2"]);
    assert!(!cache.status().await[0].stale);
    Ok(())
}

#[tokio::test]
async fn test_max_age_keeps_set_fresh() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], Some("public, max-age=3600")).await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::ZERO).await;
    cache.get(&idp.jwks_uri()).await?;

    assert_eq!(cache.refresh_stale().await, 0);
    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_refresh_stale_refetches_expired_sets() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], Some("no-store")).await;

    let cache = JwksCache::new();
    cache.register(&idp.jwks_uri(), Duration::ZERO).await;
    cache.get(&idp.jwks_uri()).await?;

    assert_eq!(cache.refresh_stale().await, 1);
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_cold_start_failure_fails_fast_within_floor() -> anyhow::Result<()> {
    let idp = MockIdp::start().await;
    idp.fail_jwks(500).await;

    let cache = JwksCache::with_config(fast_retry_config());
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    // First call fetches (with retries) and fails
    assert!(matches!(
        cache.get(&idp.jwks_uri()).await,
        Err(AuthError::KeyFetch(_))
    ));
    assert_eq!(idp.jwks_requests().await, 2);

    // Within the floor: no further requests
    assert!(matches!(
        cache.get(&idp.jwks_uri()).await,
        Err(AuthError::KeyFetch(_))
    ));
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_client_errors_are_not_retried() -> anyhow::Result<()> {
    let idp = MockIdp::start().await;
    idp.fail_jwks(404).await;

    let cache = JwksCache::with_config(fast_retry_config());
    cache.register(&idp.jwks_uri(), Duration::from_secs(60)).await;

    assert!(cache.get(&idp.jwks_uri()).await.is_err());
    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_cold_start_recovers_after_floor() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.fail_jwks(503).await;

    let cache = JwksCache::with_config(fast_retry_config());
    cache
        .register(&idp.jwks_uri(), Duration::from_millis(200))
        .await;
    assert!(cache.get(&idp.jwks_uri()).await.is_err());

    idp.publish(&[&key], None).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let keys = cache.get(&idp.jwks_uri()).await?;
    assert_eq!(keys.kids(), vec!["k1"]);
    Ok(())
}

#[tokio::test]
async fn test_unregistered_endpoint_is_key_fetch_error() {
    let cache = JwksCache::new();

    assert!(matches!(
        cache.get("https://idp.example/never-registered").await,
        Err(AuthError::KeyFetch(_))
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aborted_caller_does_not_cancel_shared_fetch() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish_slowly(&[&key], Duration::from_millis(500)).await;
    let validator = idp
        .validator_with::<OidcClaims>(TEST_AUDIENCE, Duration::from_secs(1), ClaimsFactory::default())
        .await?;
    let token = key.sign(&TestTokenBuilder::new(&idp.issuer(), TEST_AUDIENCE).build());

    // First caller starts the cold fetch
    let first = {
        let validator = Arc::clone(&validator);
        let token = token.clone();
        tokio::spawn(async move { validator.validate(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second caller joins while the fetch is in flight
    let second = {
        let validator = Arc::clone(&validator);
        tokio::spawn(async move { validator.validate(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let validated = tokio::time::timeout(Duration::from_secs(3), second).await???;
    assert_eq!(validated.key_id, "k1");
    assert_eq!(idp.jwks_requests().await, 1);
    assert!(validator.cache().status().await[0].ready);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_reads_do_not_wait_for_refresh() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], Some("no-cache")).await;
    let validator = idp
        .validator_with::<OidcClaims>(TEST_AUDIENCE, Duration::ZERO, ClaimsFactory::default())
        .await?;
    let token = key.sign(&TestTokenBuilder::new(&idp.issuer(), TEST_AUDIENCE).build());
    validator.validate(&token).await?;
    assert!(validator.cache().status().await[0].stale);

    let refresh_delay = Duration::from_secs(2);
    idp.publish_slowly(&[&key], refresh_delay).await;

    let started = Instant::now();
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let validator = Arc::clone(&validator);
            let token = token.clone();
            tokio::spawn(async move { validator.validate(&token).await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result??;
    }
    let elapsed = started.elapsed();

    assert!(
        elapsed < refresh_delay / 4,
        "stale reads took {elapsed:?} while a {refresh_delay:?} refresh was running"
    );
    // Only one background refresh was started for all readers
    tokio::time::sleep(refresh_delay + Duration::from_millis(300)).await;
    assert_eq!(idp.jwks_requests().await, 1);
    Ok(())
}

// ============================================================================
// Background refresher
// ============================================================================

#[tokio::test]
async fn test_background_refresher_loads_cold_cache() -> anyhow::Result<()> {
    let key = TestKeypair::ed25519(1, "k1")?;
    let idp = MockIdp::start().await;
    idp.publish(&[&key], None).await;

    let cache = Arc::new(JwksCache::new());
    cache.register(&idp.jwks_uri(), Duration::ZERO).await;

    let cancel = CancellationToken::new();
    let handle = cache.spawn_background_refresh(Duration::from_millis(50), cancel.clone());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(cache.status().await[0].ready);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}
