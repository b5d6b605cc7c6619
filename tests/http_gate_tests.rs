//! HTTP surface: the rate-limit gate, management routes and admin auth.

mod test_helpers;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use chat_gateway::clock::ManualClock;
use chat_gateway::config::Config;
use chat_gateway::rate_limit::{BucketState, BucketStore, ConsumeOutcome, ConsumeRequest, StoreError};
use chat_gateway::server::GatewayServer;
use chat_gateway::websocket::create_router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{create_test_server_with_config, test_config, TEST_EPOCH_MS};
use tower::ServiceExt;

fn gate_config() -> Config {
    let mut config = test_config();
    config.rate_limit.trust_forwarded_for = true;
    config
}

fn request(method: Method, path: &str, ip: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip)
}

async fn send(server: &Arc<GatewayServer>, request: Request<Body>) -> Response {
    create_router(Arc::clone(server))
        .oneshot(request)
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

#[tokio::test]
async fn test_exempt_paths_never_consume() {
    let (server, _clock) = create_test_server_with_config(gate_config());

    for _ in 0..10 {
        let response = send(
            &server,
            request(Method::GET, "/health", "10.0.0.1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header_value(&response, "x-ratelimit-limit").is_none());
    }
    assert_eq!(server.metrics().snapshot().rate_limiting.requests_admitted, 0);
}

#[tokio::test]
async fn test_anonymous_client_is_limited_by_default_tier() {
    let (server, _clock) = create_test_server_with_config(gate_config());

    for expected in ["2", "1", "0"] {
        let response = send(
            &server,
            request(Method::GET, "/api/rate-limits/tiers", "10.0.0.2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, "x-ratelimit-limit").as_deref(), Some("3"));
        assert_eq!(
            header_value(&response, "x-ratelimit-remaining").as_deref(),
            Some(expected)
        );
        assert!(header_value(&response, "x-ratelimit-reset").is_some());
    }

    let response = send(
        &server,
        request(Method::GET, "/api/rate-limits/tiers", "10.0.0.2")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_value(&response, "retry-after").as_deref(), Some("20"));
    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limit_exceeded");
    assert_eq!(body["retry_after"], 20);

    // A different client is unaffected
    let response = send(
        &server,
        request(Method::GET, "/api/rate-limits/tiers", "10.0.0.3")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_check_reports_gate_decision_without_double_spend() {
    let (server, _clock) = create_test_server_with_config(gate_config());
    let extra = json!({"tier": "pro"}).as_object().cloned();
    let token = server.auth().generate_access_token("alice", extra).unwrap();

    let response = send(
        &server,
        request(Method::GET, "/api/rate-limits/check", "10.0.0.4")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["rate_limit"]["identity"], "user:alice");
    assert_eq!(body["rate_limit"]["tier"], "pro");
    assert_eq!(body["rate_limit"]["decision"]["capacity"], 10);
    assert_eq!(body["rate_limit"]["decision"]["remaining"], 9);

    let limits = server.limiter().get_user_limits("alice").await.unwrap();
    assert_eq!(limits["pro"].remaining, 9);
}

#[tokio::test]
async fn test_store_outage_fails_closed_with_503() {
    struct DownStore;

    #[async_trait]
    impl BucketStore for DownStore {
        async fn consume(&self, _: &str, _: &ConsumeRequest) -> Result<ConsumeOutcome, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn peek(&self, _: &str, _: u64) -> Result<Option<BucketState>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn put(&self, _: &str, _: BucketState, _: Duration, _: u64) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn remove(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn purge_expired(&self, _: u64) -> usize {
            0
        }
        async fn health_check(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn backend_name(&self) -> &'static str {
            "down"
        }
    }

    let server = GatewayServer::with_store(
        gate_config(),
        Arc::new(DownStore),
        Arc::new(ManualClock::new(TEST_EPOCH_MS)),
    )
    .unwrap();

    let response = send(
        &server,
        request(Method::GET, "/api/rate-limits/tiers", "10.0.0.5")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "rate_limiter_unavailable");
}

#[tokio::test]
async fn test_admin_routes_require_admin_token_when_configured() {
    let mut config = gate_config();
    config.security.admin_token = Some("operator-secret".into());
    let (server, _clock) = create_test_server_with_config(config);

    let response = send(
        &server,
        request(Method::GET, "/ws/stats", "10.0.0.6").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &server,
        request(Method::GET, "/ws/stats", "10.0.0.7")
            .header(header::AUTHORIZATION, "Bearer wrong-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(
        &server,
        request(Method::GET, "/ws/stats", "10.0.0.8")
            .header(header::AUTHORIZATION, "Bearer operator-secret")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["total_connections"], 0);
    assert!(body["metrics"]["rate_limiting"].is_object());
}

#[tokio::test]
async fn test_tier_update_and_user_reset() {
    let (server, _clock) = create_test_server_with_config(gate_config());

    let response = send(
        &server,
        request(Method::PUT, "/api/rate-limits/tier", "10.0.1.1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"tier": "enterprise", "capacity": 500, "refill_rate": 8.5}).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["config"]["tier"], "enterprise");
    assert!(server
        .limiter()
        .tier_configs()
        .iter()
        .any(|tier| tier.name == "enterprise" && tier.capacity == 500));

    let response = send(
        &server,
        request(Method::PUT, "/api/rate-limits/tier", "10.0.1.2")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"tier": "free", "capacity": 0, "refill_rate": 1.0}).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &server,
        request(Method::POST, "/api/rate-limits/user/reset", "10.0.1.3")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"user_id": "alice", "tier": "gold"}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &server,
        request(Method::POST, "/api/rate-limits/user/reset", "10.0.1.4")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"user_id": "alice"}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["tier"], "all");
}

#[tokio::test]
async fn test_refresh_endpoint() {
    let (server, _clock) = create_test_server_with_config(gate_config());
    let refresh = server.auth().generate_refresh_token("alice").unwrap();
    let access = server.auth().generate_access_token("alice", None).unwrap();

    let response = send(
        &server,
        request(Method::POST, "/api/auth/refresh", "10.0.2.1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"refresh_token": refresh}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let issued = body["access_token"].as_str().unwrap();
    assert_eq!(server.auth().verify_access_token(issued).unwrap().user_id, "alice");

    let response = send(
        &server,
        request(Method::POST, "/api/auth/refresh", "10.0.2.2")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"refresh_token": access}).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
