//! `/api/rate-limits/*` management endpoints.

use crate::rate_limit::{RateLimitError, RateLimitOutcome};
use crate::server::GatewayServer;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::admin::enforce_admin_auth;

#[derive(Debug, Deserialize)]
pub struct TierLimitUpdate {
    pub tier: String,
    pub capacity: u32,
    pub refill_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct UserLimitReset {
    pub user_id: String,
    #[serde(default)]
    pub tier: Option<String>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "success": false,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn limiter_failure(err: &RateLimitError) -> Response {
    let status = match err {
        RateLimitError::UnknownTier(_) | RateLimitError::InvalidTierConfig { .. } => {
            StatusCode::BAD_REQUEST
        }
        RateLimitError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RateLimitError::Exceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
    };
    failure(status, err.to_string())
}

/// `GET /api/rate-limits/stats`
pub async fn rate_limit_stats(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    Ok(Json(json!({
        "success": true,
        "stats": server.limiter().statistics(),
        "metrics": server.metrics().snapshot().rate_limiting,
    })))
}

/// `GET /api/rate-limits/user/{user_id}`
pub async fn user_rate_limits(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
    Path(user_id): Path<String>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let limits = server
        .limiter()
        .get_user_limits(&user_id)
        .await
        .map_err(|err| limiter_failure(&RateLimitError::from(err)))?;
    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "limits": limits,
    })))
}

/// `POST /api/rate-limits/user/reset`
pub async fn reset_user_rate_limit(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
    Json(request): Json<UserLimitReset>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let reset = server
        .limiter()
        .reset_user_limit(&request.user_id, request.tier.as_deref())
        .await
        .map_err(|err| limiter_failure(&err))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Rate limit reset for user {}", request.user_id),
        "tier": request.tier.as_deref().unwrap_or("all"),
        "tiers_reset": reset,
    })))
}

/// `PUT /api/rate-limits/tier`
pub async fn update_tier_limits(
    headers: HeaderMap,
    State(server): State<Arc<GatewayServer>>,
    Json(request): Json<TierLimitUpdate>,
) -> axum::response::Result<Json<Value>> {
    enforce_admin_auth(&headers, &server)?;
    let config = server
        .limiter()
        .update_tier_limits(&request.tier, request.capacity, request.refill_rate)
        .map_err(|err| limiter_failure(&err))?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Tier limits updated for {}", config.name),
        "config": {
            "tier": config.name,
            "capacity": config.capacity,
            "refill_rate": config.refill_rate,
        },
    })))
}

/// `GET /api/rate-limits/check`: reports the decision the gate already made
/// for this request instead of consuming a second token.
pub async fn check_current_rate_limit(
    outcome: Option<Extension<RateLimitOutcome>>,
) -> axum::response::Result<Json<Value>> {
    let Some(Extension(outcome)) = outcome else {
        return Err(failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "Rate limiting is disabled for this request",
        )
        .into());
    };
    Ok(Json(json!({
        "success": true,
        "rate_limit": outcome,
    })))
}

/// `GET /api/rate-limits/tiers`
pub async fn list_tier_configurations(State(server): State<Arc<GatewayServer>>) -> Json<Value> {
    let tiers: Map<String, Value> = server
        .limiter()
        .tier_configs()
        .into_iter()
        .map(|tier| {
            let summary = json!({
                "capacity": tier.capacity,
                "refill_rate": tier.refill_rate,
                "requests_per_minute": tier.requests_per_minute(),
                "requests_per_hour": tier.requests_per_hour(),
            });
            (tier.name, summary)
        })
        .collect();
    Json(json!({
        "success": true,
        "tiers": tiers,
    }))
}

/// `GET /api/rate-limits/health`
pub async fn rate_limiter_health(State(server): State<Arc<GatewayServer>>) -> Response {
    let limiter = server.limiter();
    let tiers_configured = limiter.tier_configs().len();
    match limiter.store_health().await {
        Ok(()) => Json(json!({
            "success": true,
            "healthy": true,
            "backend": limiter.backend_name(),
            "tiers_configured": tiers_configured,
        }))
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "healthy": false,
                "backend": limiter.backend_name(),
                "tiers_configured": tiers_configured,
                "error": err.to_string(),
            })),
        )
            .into_response(),
    }
}
