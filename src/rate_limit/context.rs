//! Typed request context threaded through the HTTP pipeline.

use serde::Serialize;

use super::bucket::RateDecision;

/// Authenticated caller, attached as a request extension by the identity
/// middleware before the rate-limit gate runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: String,
    pub tier: Option<String>,
}

impl RequestIdentity {
    pub fn new(user_id: impl Into<String>, tier: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier,
        }
    }
}

/// Everything the limiter needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_ip: String,
    pub path: String,
    pub identity: Option<RequestIdentity>,
}

impl RequestContext {
    pub fn new(client_ip: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            client_ip: client_ip.into(),
            path: path.into(),
            identity: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Option<RequestIdentity>) -> Self {
        self.identity = identity;
        self
    }
}

/// Admission recorded by the gate for downstream handlers.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitOutcome {
    pub identity: String,
    pub tier: String,
    pub decision: RateDecision,
}
