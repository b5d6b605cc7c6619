use crate::auth::{attach_request_identity, AuthError};
use crate::rate_limit::rate_limit_gate;
use crate::server::GatewayServer;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::Json;
use axum::routing::{delete, get, post, put};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::admin::{broadcast_announcement, disconnect_session, list_sessions, websocket_stats};
use super::handler::chat_websocket_handler;
use super::rate_limits::{
    check_current_rate_limit, list_tier_configurations, rate_limit_stats, rate_limiter_health,
    reset_user_rate_limit, update_tier_limits, user_rate_limits,
};

fn cors_layer(cors_origins: &str) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{Any, CorsLayer};

    if cors_origins == "*" {
        return CorsLayer::permissive();
    }

    let origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured, using permissive CORS");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the router with every route, the rate-limit gate and the identity
/// middleware. Identity runs first so the gate can pick the caller's tier.
pub fn create_router(server: Arc<GatewayServer>) -> axum::Router {
    use tower_http::trace::TraceLayer;

    let gate = server.gate_state();
    let auth = Arc::clone(server.auth());
    let cors = cors_layer(&server.config().security.cors_origins);

    axum::Router::new()
        .route("/health", get(health_check))
        .route("/ws/chat", get(chat_websocket_handler))
        .route("/ws/stats", get(websocket_stats))
        .route("/ws/sessions", get(list_sessions))
        .route("/ws/sessions/{session_id}", delete(disconnect_session))
        .route("/ws/broadcast", post(broadcast_announcement))
        .route("/api/rate-limits/stats", get(rate_limit_stats))
        .route("/api/rate-limits/user/reset", post(reset_user_rate_limit))
        .route("/api/rate-limits/user/{user_id}", get(user_rate_limits))
        .route("/api/rate-limits/tier", put(update_tier_limits))
        .route("/api/rate-limits/check", get(check_current_rate_limit))
        .route("/api/rate-limits/tiers", get(list_tier_configurations))
        .route("/api/rate-limits/health", get(rate_limiter_health))
        .route("/api/auth/refresh", post(refresh_token))
        .with_state(server)
        .layer(from_fn_with_state(gate, rate_limit_gate))
        .layer(from_fn_with_state(auth, attach_request_identity))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Liveness check
async fn health_check(
    State(server): State<Arc<GatewayServer>>,
) -> axum::response::Result<Json<Value>> {
    if server.health_check().await {
        Ok(Json(json!({
            "status": "healthy",
            "active_connections": server.metrics().snapshot().connections.active_connections,
        })))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE.into())
    }
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

/// `POST /api/auth/refresh`
async fn refresh_token(
    State(server): State<Arc<GatewayServer>>,
    Json(request): Json<RefreshRequest>,
) -> axum::response::Result<Json<Value>> {
    match server.auth().refresh_access_token(&request.refresh_token) {
        Ok(access_token) => Ok(Json(json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": server.config().auth.access_token_ttl_secs,
        }))),
        Err(err) => {
            tracing::info!(error = %err, "Refresh token rejected");
            let status = match err {
                AuthError::TokenIssue(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::UNAUTHORIZED,
            };
            Err((status, Json(json!({"error": err.to_string()}))).into())
        }
    }
}
