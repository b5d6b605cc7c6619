//! Token-bucket admission control.
//!
//! Buckets live in a [`BucketStore`] (process-local or shared through Redis),
//! [`TokenBucket`] owns the refill math for one scope, and
//! [`MultiTierRateLimiter`] layers the per-IP guard in front of the
//! per-identity tier buckets. [`middleware::rate_limit_gate`] applies the
//! limiter to every HTTP request.

pub mod bucket;
pub mod context;
pub mod error;
pub mod limiter;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;

pub use bucket::{BucketSnapshot, RateDecision, TokenBucket};
pub use context::{RateLimitOutcome, RequestContext, RequestIdentity};
pub use error::{LimitScope, RateLimitError, StoreError};
pub use limiter::{
    hash_client_ip, rate_limit_headers, MultiTierRateLimiter, RateLimitStatistics, TierConfig,
    TierLimitStatus,
};
pub use middleware::{client_ip, rate_limit_gate, GateState};
#[cfg(feature = "redis")]
pub use redis_store::RedisBucketStore;
pub use store::{BucketState, BucketStore, ConsumeOutcome, ConsumeRequest, InMemoryBucketStore};

/// Prefix shared by every bucket key in the store.
pub const BUCKET_KEY_PREFIX: &str = "rate_limit:bucket";

/// Scope label of the per-IP guard bucket.
pub const IP_GUARD_SCOPE: &str = "ip_guard";

/// Response headers describing the latest admission decision.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_PROCESS_TIME: &str = "x-process-time";
