//! Rate limiter errors and the scope a rejection came from.

use std::fmt;
use thiserror::Error;

use super::bucket::RateDecision;

/// Failures of the bucket store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("bucket store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt bucket state for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Which guard rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    /// The fixed per-IP guard bucket.
    Ip,
    /// A named tier bucket.
    Tier(String),
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip => f.write_str("ip"),
            Self::Tier(name) => write!(f, "tier:{name}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded ({scope}); retry after {retry_after_secs}s")]
    Exceeded {
        scope: LimitScope,
        retry_after_secs: u64,
        decision: RateDecision,
    },
    #[error("rate limiter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("unknown rate limit tier '{0}'")]
    UnknownTier(String),
    #[error("invalid configuration for tier '{tier}': {reason}")]
    InvalidTierConfig { tier: String, reason: String },
}

impl RateLimitError {
    /// Seconds the client should wait before retrying, when rejected by a bucket.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Exceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
