//! Authentication middleware and HTTP integration tests.
//!
//! Drives the real router with `tower::ServiceExt::oneshot`, plus one
//! end-to-end run over TCP via `TestAuthServer`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, StatusCode};
use axum::{middleware, routing::get, Router};
use bearer_auth::auth::providers::OidcClaims;
use bearer_auth::auth::{JwtValidator, ProviderClaims};
use bearer_auth::errors::{EXPIRED_TOKEN_MESSAGE, INVALID_TOKEN_MESSAGE};
use bearer_auth::middleware::{authenticate, AuthState, ClaimsExt};
use bearer_auth::routes::{apply_service_layers, build_routes, AppState};
use bearer_auth_test_utils::*;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Fixture {
    key: TestKeypair,
    idp: MockIdp,
    validator: Arc<JwtValidator<OidcClaims>>,
}

impl Fixture {
    async fn new() -> Result<Self> {
        let key = TestKeypair::ed25519(7, "k7")?;
        let idp = MockIdp::start().await;
        idp.publish(&[&key], None).await;
        let validator = idp.validator::<OidcClaims>(TEST_AUDIENCE).await?;
        Ok(Self {
            key,
            idp,
            validator,
        })
    }

    fn claims(&self) -> TestTokenBuilder {
        TestTokenBuilder::new(&self.idp.issuer(), TEST_AUDIENCE)
    }

    fn token(&self) -> String {
        self.key.sign(&self.claims().build())
    }

    fn app(&self) -> Router {
        build_routes(
            Arc::new(AppState {
                validator: Arc::clone(&self.validator),
            }),
            PrometheusBuilder::new().build_recorder().handle(),
        )
    }

    /// Router with a handler that reports who the middleware saw.
    fn whoami_app(&self) -> Router {
        async fn whoami(req: Request) -> String {
            match req.validated_token::<OidcClaims>() {
                Some(token) => token.claims.registered().sub.clone(),
                None => "anonymous".to_string(),
            }
        }

        let auth_state = Arc::new(AuthState {
            validator: Arc::clone(&self.validator),
        });
        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn_with_state(
                auth_state,
                authenticate::<OidcClaims>,
            ))
    }
}

fn get_request(uri: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

// ============================================================================
// Middleware pass-through semantics
// ============================================================================

#[tokio::test]
async fn test_request_without_token_passes_through() -> Result<()> {
    let fixture = Fixture::new().await?;

    let response = fixture
        .whoami_app()
        .oneshot(get_request("/whoami", None))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "anonymous");
    assert_eq!(fixture.idp.jwks_requests().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_non_bearer_authorization_passes_through() -> Result<()> {
    let fixture = Fixture::new().await?;

    for value in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer    ", "Token abc"] {
        let response = fixture
            .whoami_app()
            .oneshot(get_request("/whoami", Some(value)))
            .await?;

        assert_eq!(response.status(), StatusCode::OK, "header {value:?}");
        assert_eq!(body_text(response).await, "anonymous");
    }
    Ok(())
}

#[tokio::test]
async fn test_valid_token_is_attached_to_request() -> Result<()> {
    let fixture = Fixture::new().await?;
    let token = fixture.key.sign(&fixture.claims().for_subject("alice").build());

    let response = fixture
        .whoami_app()
        .oneshot(get_request("/whoami", Some(&format!("bearer {token}"))))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "alice");
    Ok(())
}

#[tokio::test]
async fn test_invalid_token_short_circuits_with_generic_401() -> Result<()> {
    let fixture = Fixture::new().await?;
    let forged = tamper_payload(
        &fixture.token(),
        &fixture.claims().for_subject("mallory").build(),
    );

    let response = fixture
        .whoami_app()
        .oneshot(get_request("/whoami", Some(&format!("Bearer {forged}"))))
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Bearer realm=\"bearer-auth\", error=\"invalid_token\""
    );
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    assert_eq!(body["error"]["message"], INVALID_TOKEN_MESSAGE);
    Ok(())
}

#[tokio::test]
async fn test_rejections_do_not_reveal_failed_check() -> Result<()> {
    let fixture = Fixture::new().await?;
    let tokens = [
        fixture
            .key
            .sign(&fixture.claims().with_claim("iss", json!("https://evil/")).build()),
        fixture.key.sign(&fixture.claims().with_audiences(&["other"]).build()),
        sign_hs256("k7", b"secret", &fixture.claims().build()),
        "garbage".to_string(),
    ];

    for token in tokens {
        let response = fixture
            .whoami_app()
            .oneshot(get_request("/whoami", Some(&format!("Bearer {token}"))))
            .await?;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], INVALID_TOKEN_MESSAGE);
    }
    Ok(())
}

#[tokio::test]
async fn test_expired_token_gets_specific_message() -> Result<()> {
    let fixture = Fixture::new().await?;
    let token = fixture.key.sign(&fixture.claims().expires_in(-600).build());

    let response = fixture
        .whoami_app()
        .oneshot(get_request("/whoami", Some(&format!("Bearer {token}"))))
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE]
        .to_str()?
        .to_string();
    assert!(challenge.contains("error=\"invalid_token\""));
    assert!(challenge.contains(EXPIRED_TOKEN_MESSAGE));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "TOKEN_EXPIRED");
    assert_eq!(body["error"]["message"], EXPIRED_TOKEN_MESSAGE);
    Ok(())
}

#[tokio::test]
async fn test_unavailable_keys_are_503() -> Result<()> {
    let fixture = Fixture::new().await?;
    fixture.idp.fail_jwks(404).await;

    let response = fixture
        .whoami_app()
        .oneshot(get_request("/whoami", Some(&format!("Bearer {}", fixture.token()))))
        .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
    Ok(())
}

// ============================================================================
// Routes
// ============================================================================

#[tokio::test]
async fn test_me_requires_authentication() -> Result<()> {
    let fixture = Fixture::new().await?;

    let response = fixture.app().oneshot(get_request("/v1/me", None)).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Bearer realm=\"bearer-auth\""
    );
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    Ok(())
}

#[tokio::test]
async fn test_me_returns_caller_identity() -> Result<()> {
    let fixture = Fixture::new().await?;
    let token = fixture.key.sign(
        &fixture
            .claims()
            .with_claim("email", json!("ada@example.com"))
            .with_claim("roles", json!(["Admin"]))
            .build(),
    );

    let response = fixture
        .app()
        .oneshot(get_request("/v1/me", Some(&format!("Bearer {token}"))))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["subject_id"], TEST_SUBJECT);
    assert_eq!(body["email"], "ada@example.com");
    assert_eq!(body["roles"], json!(["Admin"]));
    assert_eq!(body["issuer"], fixture.idp.issuer());
    assert!(body.get("name").is_none());
    Ok(())
}

#[tokio::test]
async fn test_health_reports_key_sets() -> Result<()> {
    let fixture = Fixture::new().await?;
    let app = fixture.app();

    let response = app.clone().oneshot(get_request("/health", None)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["jwks"][0]["jwks_uri"], fixture.idp.jwks_uri());
    assert_eq!(body["jwks"][0]["ready"], false);

    // Not ready until a key set has been loaded
    let response = app.clone().oneshot(get_request("/ready", None)).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    fixture.validator.validate(&fixture.token()).await?;

    let response = app.oneshot(get_request("/ready", None)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["jwks"][0]["key_count"], 1);
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<()> {
    let fixture = Fixture::new().await?;

    let response = fixture.app().oneshot(get_request("/metrics", None)).await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_404() -> Result<()> {
    let fixture = Fixture::new().await?;

    let response = fixture
        .app()
        .oneshot(get_request("/v1/nope", None))
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[allow(clippy::panic)]
async fn failing_handler() -> &'static str {
    panic!("handler failure");
}

#[tokio::test]
async fn test_handler_panic_becomes_500_and_server_keeps_serving() -> Result<()> {
    let app = apply_service_layers(
        Router::new()
            .route("/fail", get(failing_handler))
            .route("/ok", get(|| async { "ok" })),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move { axum::serve(listener, app).await });
    let client = reqwest::Client::new();

    let failed = client.get(format!("http://{addr}/fail")).send().await?;
    assert_eq!(failed.status(), 500);

    for _ in 0..2 {
        let ok = client.get(format!("http://{addr}/ok")).send().await?;
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.text().await?, "ok");
    }

    let failed_again = client.get(format!("http://{addr}/fail")).send().await?;
    assert_eq!(failed_again.status(), 500);

    server.abort();
    Ok(())
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_me_over_http() -> Result<()> {
    let fixture = Fixture::new().await?;
    let server = TestAuthServer::spawn(Arc::clone(&fixture.validator)).await?;
    let client = reqwest::Client::new();

    let anonymous = client
        .get(format!("{}/v1/me", server.url()))
        .send()
        .await?;
    assert_eq!(anonymous.status(), 401);

    let response = client
        .get(format!("{}/v1/me", server.url()))
        .bearer_auth(fixture.token())
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["subject_id"], TEST_SUBJECT);
    assert!(body["exp"].as_i64().unwrap() > chrono::Utc::now().timestamp());

    let metrics = client
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;
    assert_eq!(metrics.status(), 200);
    Ok(())
}
