//! Rate limiting configuration types.

use super::defaults::{
    default_bucket_ttl_secs, default_default_tier, default_exempt_paths,
    default_ip_limit, default_rate_limit_cleanup_interval_secs, default_rate_limit_enabled,
    default_redis_url, default_tiers,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where bucket state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local map; buckets are not shared between instances.
    #[default]
    Memory,
    /// Shared Redis server (requires the `redis` feature).
    Redis,
}

/// Behavior when the bucket store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the failure.
    Open,
    /// Reject the request with 503.
    #[default]
    Closed,
}

impl FailurePolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Capacity and refill rate of one bucket profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimits {
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl TierLimits {
    #[must_use]
    pub const fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Capacity per minute, i.e. `capacity` tokens refilled over 60 seconds.
    #[must_use]
    pub const fn per_minute(capacity: u32) -> Self {
        Self {
            capacity,
            refill_rate: capacity as f64 / 60.0,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch for the HTTP gate
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Connection URL used when `storage` is `redis`
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Seconds of inactivity after which bucket state expires
    #[serde(default = "default_bucket_ttl_secs")]
    pub bucket_ttl_secs: u64,
    /// Tier applied when a request names no (known) tier
    #[serde(default = "default_default_tier")]
    pub default_tier: String,
    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, TierLimits>,
    /// Per-IP guard evaluated before any tier bucket
    #[serde(default = "default_ip_limit")]
    pub ip_limit: TierLimits,
    /// Path prefixes that bypass rate limiting
    #[serde(
        default = "default_exempt_paths",
        deserialize_with = "super::types::string_list"
    )]
    pub exempt_paths: Vec<String>,
    /// Take the client IP from the first `X-Forwarded-For` hop
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Emit `X-Process-Time` on admitted responses
    #[serde(default)]
    pub enable_timing: bool,
    /// Interval for purging expired in-memory buckets
    #[serde(default = "default_rate_limit_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            storage: StorageBackend::default(),
            redis_url: default_redis_url(),
            failure_policy: FailurePolicy::default(),
            bucket_ttl_secs: default_bucket_ttl_secs(),
            default_tier: default_default_tier(),
            tiers: default_tiers(),
            ip_limit: default_ip_limit(),
            exempt_paths: default_exempt_paths(),
            trust_forwarded_for: false,
            enable_timing: false,
            cleanup_interval_secs: default_rate_limit_cleanup_interval_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tiers.is_empty() {
            anyhow::bail!("rate_limit.tiers must define at least one tier");
        }
        if !self.tiers.contains_key(&self.default_tier) {
            anyhow::bail!(
                "rate_limit.default_tier '{}' is not one of the configured tiers ({})",
                self.default_tier,
                self.tiers.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        for (name, limits) in &self.tiers {
            validate_limits(&format!("rate_limit.tiers.{name}"), limits)?;
        }
        validate_limits("rate_limit.ip_limit", &self.ip_limit)?;
        if self.bucket_ttl_secs == 0 {
            anyhow::bail!("rate_limit.bucket_ttl_secs must be greater than zero");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("rate_limit.cleanup_interval_secs must be greater than zero");
        }
        if self.storage == StorageBackend::Redis {
            let url = url::Url::parse(&self.redis_url).map_err(|err| {
                anyhow::anyhow!("rate_limit.redis_url '{}' is invalid: {err}", self.redis_url)
            })?;
            if !matches!(url.scheme(), "redis" | "rediss") {
                anyhow::bail!(
                    "rate_limit.redis_url must use the redis:// or rediss:// scheme (got {})",
                    url.scheme()
                );
            }
        }
        Ok(())
    }
}

fn validate_limits(field: &str, limits: &TierLimits) -> anyhow::Result<()> {
    if limits.capacity == 0 {
        anyhow::bail!("{field}.capacity must be greater than zero");
    }
    if !limits.refill_rate.is_finite() || limits.refill_rate < 0.0 {
        anyhow::bail!(
            "{field}.refill_rate must be a finite, non-negative number (configured: {})",
            limits.refill_rate
        );
    }
    Ok(())
}
