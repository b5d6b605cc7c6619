//! HTTP middleware that resolves the caller's identity from a bearer token.
//!
//! The identity is only a hint for rate limiting: a missing or invalid token
//! leaves the request anonymous, and routes that need authentication enforce
//! it themselves.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::service::{bearer_token, TokenAuthService};
use crate::rate_limit::RequestIdentity;

/// Constant-time secret comparison to prevent timing attacks.
#[must_use]
pub fn secrets_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Bearer token from the `Authorization` header, if any.
#[must_use]
pub fn authorization_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .and_then(bearer_token)
}

/// Identity carried by a valid access token in `headers`.
#[must_use]
pub fn resolve_identity(auth: &TokenAuthService, headers: &HeaderMap) -> Option<RequestIdentity> {
    let token = authorization_token(headers)?;
    match auth.verify_access_token(token) {
        Ok(claims) if !claims.user_id.is_empty() => Some(RequestIdentity::new(
            claims.user_id.clone(),
            claims.tier().map(str::to_owned),
        )),
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "Ignoring invalid bearer token for request identity");
            None
        }
    }
}

pub async fn attach_request_identity(
    State(auth): State<Arc<TokenAuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(identity) = resolve_identity(&auth, request.headers()) {
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AuthConfig;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn service() -> TokenAuthService {
        TokenAuthService::new(
            &AuthConfig::default(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
    }

    #[test]
    fn test_identity_carries_tier_claim() {
        let auth = service();
        let extra = json!({"tier": "pro"}).as_object().cloned();
        let token = auth.generate_access_token("42", extra).unwrap();

        let identity = resolve_identity(&auth, &headers_with(&format!("Bearer {token}"))).unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.tier.as_deref(), Some("pro"));
    }

    #[test]
    fn test_invalid_or_refresh_tokens_are_anonymous() {
        let auth = service();
        assert!(resolve_identity(&auth, &headers_with("Bearer garbage")).is_none());

        let refresh = auth.generate_refresh_token("42").unwrap();
        assert!(resolve_identity(&auth, &headers_with(&format!("Bearer {refresh}"))).is_none());
        assert!(resolve_identity(&auth, &HeaderMap::new()).is_none());
    }
}
