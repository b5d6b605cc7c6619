//! Axum middleware that meters every non-exempt HTTP request.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::context::{RequestContext, RequestIdentity};
use super::error::RateLimitError;
use super::limiter::{rate_limit_headers, MultiTierRateLimiter};
use super::HEADER_PROCESS_TIME;

/// State handed to [`rate_limit_gate`] through `from_fn_with_state`.
#[derive(Clone, Debug)]
pub struct GateState {
    pub limiter: Arc<MultiTierRateLimiter>,
    pub enabled: bool,
    pub trust_forwarded_for: bool,
    pub enable_timing: bool,
}

impl GateState {
    pub fn new(limiter: Arc<MultiTierRateLimiter>) -> Self {
        Self {
            limiter,
            enabled: true,
            trust_forwarded_for: false,
            enable_timing: false,
        }
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop when trusted,
/// then the socket peer, else `"unknown"`.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_owned();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_owned(), |info| info.0.ip().to_string())
}

pub async fn rate_limit_gate(
    State(gate): State<GateState>,
    mut request: Request,
    next: Next,
) -> Response {
    if !gate.enabled || gate.limiter.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let started = Instant::now();
    let ctx = RequestContext::new(
        client_ip(&request, gate.trust_forwarded_for),
        request.uri().path(),
    )
    .with_identity(request.extensions().get::<RequestIdentity>().cloned());

    let outcome = match gate.limiter.admit(&ctx).await {
        Ok(outcome) => outcome,
        Err(err) => return rejection_response(&err),
    };

    let decision = outcome.decision.clone();
    request.extensions_mut().insert(outcome);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.extend(rate_limit_headers(&decision));
    if gate.enable_timing {
        let elapsed = format!("{:.4}", started.elapsed().as_secs_f64());
        if let Ok(value) = HeaderValue::from_str(&elapsed) {
            headers.insert(HeaderName::from_static(HEADER_PROCESS_TIME), value);
        }
    }
    response
}

fn rejection_response(err: &RateLimitError) -> Response {
    match err {
        RateLimitError::Exceeded {
            retry_after_secs,
            decision,
            ..
        } => {
            let mut headers: HeaderMap = rate_limit_headers(decision);
            headers.insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from(*retry_after_secs),
            );
            let body = Json(json!({
                "error": "rate_limit_exceeded",
                "message": err.to_string(),
                "retry_after": retry_after_secs,
            }));
            (StatusCode::TOO_MANY_REQUESTS, headers, body).into_response()
        }
        RateLimitError::StoreUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "rate_limiter_unavailable",
                "message": "Rate limiting is temporarily unavailable",
            })),
        )
            .into_response(),
        RateLimitError::UnknownTier(_) | RateLimitError::InvalidTierConfig { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "rate_limiter_misconfigured",
                "message": err.to_string(),
            })),
        )
            .into_response(),
    }
}
