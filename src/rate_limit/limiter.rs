//! Per-IP guard plus per-identity tier buckets.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::bucket::{RateDecision, TokenBucket};
use super::context::{RateLimitOutcome, RequestContext};
use super::error::{LimitScope, RateLimitError, StoreError};
use super::store::BucketStore;
use super::{HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, IP_GUARD_SCOPE};
use crate::clock::SharedClock;
use crate::config::{FailurePolicy, RateLimitConfig, TierLimits};
use crate::metrics::GatewayMetrics;

/// Named bucket profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl TierConfig {
    pub fn new(name: impl Into<String>, capacity: u32, refill_rate: f64) -> Self {
        Self {
            name: name.into(),
            capacity,
            refill_rate,
        }
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        let invalid = |reason: &str| RateLimitError::InvalidTierConfig {
            tier: self.name.clone(),
            reason: reason.to_owned(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("tier name must not be empty"));
        }
        if self.capacity == 0 {
            return Err(invalid("capacity must be greater than zero"));
        }
        if !self.refill_rate.is_finite() || self.refill_rate < 0.0 {
            return Err(invalid("refill_rate must be a finite, non-negative number"));
        }
        Ok(())
    }

    /// Sustained requests per minute allowed by the refill rate.
    #[must_use]
    pub fn requests_per_minute(&self) -> u64 {
        (self.refill_rate * 60.0).floor() as u64
    }

    #[must_use]
    pub fn requests_per_hour(&self) -> u64 {
        (self.refill_rate * 3600.0).floor() as u64
    }

    fn from_bucket(name: &str, bucket: &TokenBucket) -> Self {
        Self::new(name, bucket.capacity(), bucket.refill_rate())
    }
}

/// Projected state of one tier bucket for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierLimitStatus {
    pub capacity: u32,
    pub remaining: u32,
    pub refill_rate: f64,
    pub reset_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatistics {
    pub backend: &'static str,
    pub default_tier: String,
    pub failure_policy: FailurePolicy,
    pub bucket_ttl_secs: u64,
    pub ip_limit: TierConfig,
    pub tiers: Vec<TierConfig>,
    pub exempt_paths: Vec<String>,
}

/// Hash an IP so raw addresses never appear in identity keys.
#[must_use]
pub fn hash_client_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(16);
    encoded
}

/// Orchestrates the per-IP guard and the tier buckets.
pub struct MultiTierRateLimiter {
    ip_guard: TokenBucket,
    tiers: DashMap<String, Arc<TokenBucket>>,
    default_tier: String,
    failure_policy: FailurePolicy,
    exempt_paths: Vec<String>,
    bucket_ttl: Duration,
    store: Arc<dyn BucketStore>,
    clock: SharedClock,
    metrics: Arc<GatewayMetrics>,
}

impl std::fmt::Debug for MultiTierRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTierRateLimiter")
            .field("ip_guard", &self.ip_guard)
            .field("tiers", &self.tier_configs())
            .field("default_tier", &self.default_tier)
            .field("failure_policy", &self.failure_policy)
            .finish_non_exhaustive()
    }
}

impl MultiTierRateLimiter {
    pub fn new(
        config: &RateLimitConfig,
        store: Arc<dyn BucketStore>,
        clock: SharedClock,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, RateLimitError> {
        let bucket_ttl = Duration::from_secs(config.bucket_ttl_secs.max(1));
        let ip_config = TierConfig::new(
            IP_GUARD_SCOPE,
            config.ip_limit.capacity,
            config.ip_limit.refill_rate,
        );
        ip_config.validate()?;

        let limiter = Self {
            ip_guard: build_bucket(IP_GUARD_SCOPE.to_owned(), &config.ip_limit, &store, &clock)
                .with_ttl(bucket_ttl),
            tiers: DashMap::new(),
            default_tier: config.default_tier.clone(),
            failure_policy: config.failure_policy,
            exempt_paths: config.exempt_paths.clone(),
            bucket_ttl,
            store,
            clock,
            metrics,
        };

        for (name, limits) in &config.tiers {
            limiter.install_tier(TierConfig::new(name, limits.capacity, limits.refill_rate))?;
        }
        if !limiter.tiers.contains_key(&limiter.default_tier) {
            return Err(RateLimitError::UnknownTier(limiter.default_tier.clone()));
        }

        Ok(limiter)
    }

    fn install_tier(&self, tier: TierConfig) -> Result<Arc<TokenBucket>, RateLimitError> {
        tier.validate()?;
        let bucket = Arc::new(
            build_bucket(
                format!("tier:{}", tier.name),
                &TierLimits::new(tier.capacity, tier.refill_rate),
                &self.store,
                &self.clock,
            )
            .with_ttl(self.bucket_ttl),
        );
        self.tiers.insert(tier.name, Arc::clone(&bucket));
        Ok(bucket)
    }

    fn tier_bucket(&self, tier: &str) -> Option<Arc<TokenBucket>> {
        self.tiers.get(tier).map(|entry| Arc::clone(entry.value()))
    }

    /// Tier buckets sorted by name.
    fn tier_buckets(&self) -> Vec<(String, Arc<TokenBucket>)> {
        let mut buckets: Vec<_> = self
            .tiers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        buckets.sort_by(|a, b| a.0.cmp(&b.0));
        buckets
    }

    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    #[must_use]
    pub const fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Identity key for the tier bucket: the authenticated user, else a hash
    /// of the client IP.
    #[must_use]
    pub fn identify(&self, ctx: &RequestContext) -> String {
        match &ctx.identity {
            Some(identity) => format!("user:{}", identity.user_id),
            None => format!("ip:{}", hash_client_ip(&ctx.client_ip)),
        }
    }

    #[must_use]
    pub fn resolve_tier(&self, ctx: &RequestContext) -> String {
        ctx.identity
            .as_ref()
            .and_then(|identity| identity.tier.as_deref())
            .filter(|tier| self.tiers.contains_key(*tier))
            .map_or_else(|| self.default_tier.clone(), str::to_owned)
    }

    /// IP guard first, then the identity's tier bucket. Returns the tier decision.
    pub async fn check_rate_limit(
        &self,
        ctx: &RequestContext,
    ) -> Result<RateDecision, RateLimitError> {
        self.admit(ctx).await.map(|outcome| outcome.decision)
    }

    /// Same as [`Self::check_rate_limit`] but also reports the identity and
    /// tier the decision was made for.
    pub async fn admit(&self, ctx: &RequestContext) -> Result<RateLimitOutcome, RateLimitError> {
        let ip_key = format!("ip:{}", ctx.client_ip);
        let ip_decision = self.consume_with_policy(&self.ip_guard, &ip_key).await?;
        if !ip_decision.allowed {
            let retry_after_secs = ip_decision.retry_after_secs.unwrap_or(1);
            self.metrics.increment_ip_rejections();
            warn!(
                client_ip = %ctx.client_ip,
                path = %ctx.path,
                retry_after = retry_after_secs,
                "IP rate limit exceeded"
            );
            return Err(RateLimitError::Exceeded {
                scope: LimitScope::Ip,
                retry_after_secs,
                decision: ip_decision,
            });
        }

        let identity = self.identify(ctx);
        let tier = self.resolve_tier(ctx);
        let bucket = self
            .tier_bucket(&tier)
            .ok_or_else(|| RateLimitError::UnknownTier(tier.clone()))?;

        let decision = self.consume_with_policy(&bucket, &identity).await?;
        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
            self.metrics.increment_tier_rejections();
            warn!(
                identity = %identity,
                tier = %tier,
                path = %ctx.path,
                retry_after = retry_after_secs,
                "Tier rate limit exceeded"
            );
            return Err(RateLimitError::Exceeded {
                scope: LimitScope::Tier(tier),
                retry_after_secs,
                decision,
            });
        }

        self.metrics.increment_requests_admitted();
        Ok(RateLimitOutcome {
            identity,
            tier,
            decision,
        })
    }

    async fn consume_with_policy(
        &self,
        bucket: &TokenBucket,
        identifier: &str,
    ) -> Result<RateDecision, RateLimitError> {
        match bucket.consume(identifier, 1).await {
            Ok(decision) => Ok(decision),
            Err(err) => {
                self.metrics.increment_store_failures();
                match self.failure_policy {
                    FailurePolicy::Open => {
                        self.metrics.increment_store_failures_admitted();
                        warn!(
                            scope = bucket.scope(),
                            error = %err,
                            "Bucket store unavailable; admitting request (fail-open)"
                        );
                        let now_secs = u64::try_from(self.clock.now_secs()).unwrap_or(0);
                        Ok(RateDecision::allowed(
                            bucket.capacity(),
                            bucket.capacity(),
                            now_secs,
                        ))
                    }
                    FailurePolicy::Closed => {
                        error!(
                            scope = bucket.scope(),
                            error = %err,
                            "Bucket store unavailable; rejecting request (fail-closed)"
                        );
                        Err(RateLimitError::StoreUnavailable(err))
                    }
                }
            }
        }
    }

    /// Replace the bucket bound to `tier`. Unknown names create a new tier.
    /// Stored per-identity tokens are kept and clamped on their next refill.
    pub fn update_tier_limits(
        &self,
        tier: &str,
        capacity: u32,
        refill_rate: f64,
    ) -> Result<TierConfig, RateLimitError> {
        let config = TierConfig::new(tier, capacity, refill_rate);
        let previous = self
            .tier_bucket(tier)
            .map(|bucket| TierConfig::from_bucket(tier, &bucket));
        self.install_tier(config.clone())?;

        info!(
            tier = %tier,
            capacity,
            refill_rate,
            previous_capacity = previous.as_ref().map(|p| p.capacity),
            "Updated tier limits"
        );
        Ok(config)
    }

    /// Projected remaining tokens of `user_id` in every tier.
    pub async fn get_user_limits(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<String, TierLimitStatus>, StoreError> {
        let identity = format!("user:{user_id}");
        let mut limits = BTreeMap::new();
        for (name, bucket) in self.tier_buckets() {
            let snapshot = bucket.peek(&identity).await?;
            limits.insert(
                name,
                TierLimitStatus {
                    capacity: snapshot.capacity,
                    remaining: snapshot.remaining,
                    refill_rate: snapshot.refill_rate,
                    reset_at: snapshot.reset_at,
                },
            );
        }
        Ok(limits)
    }

    /// Refill `user_id` to full capacity in one tier, or in all tiers.
    /// Returns the names of the tiers that were reset.
    pub async fn reset_user_limit(
        &self,
        user_id: &str,
        tier: Option<&str>,
    ) -> Result<Vec<String>, RateLimitError> {
        let identity = format!("user:{user_id}");
        let targets = match tier {
            Some(name) => {
                let bucket = self
                    .tier_bucket(name)
                    .ok_or_else(|| RateLimitError::UnknownTier(name.to_owned()))?;
                vec![(name.to_owned(), bucket)]
            }
            None => self.tier_buckets(),
        };

        let mut reset = Vec::with_capacity(targets.len());
        for (name, bucket) in targets {
            bucket.reset(&identity).await?;
            reset.push(name);
        }

        info!(
            user_id = %user_id,
            tiers = %tier.unwrap_or("all tiers"),
            "Reset user rate limit"
        );
        Ok(reset)
    }

    #[must_use]
    pub fn tier_configs(&self) -> Vec<TierConfig> {
        self.tier_buckets()
            .into_iter()
            .map(|(name, bucket)| TierConfig::from_bucket(&name, &bucket))
            .collect()
    }

    #[must_use]
    pub fn statistics(&self) -> RateLimitStatistics {
        RateLimitStatistics {
            backend: self.store.backend_name(),
            default_tier: self.default_tier.clone(),
            failure_policy: self.failure_policy,
            bucket_ttl_secs: self.bucket_ttl.as_secs(),
            ip_limit: TierConfig::from_bucket(IP_GUARD_SCOPE, &self.ip_guard),
            tiers: self.tier_configs(),
            exempt_paths: self.exempt_paths.clone(),
        }
    }

    pub async fn store_health(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }

    /// Drop expired bucket state from stores without native expiry.
    pub async fn purge_expired(&self) -> usize {
        let removed = self.store.purge_expired(self.clock.now_millis()).await;
        self.metrics.add_buckets_purged(removed as u64);
        removed
    }
}

fn build_bucket(
    scope: String,
    limits: &TierLimits,
    store: &Arc<dyn BucketStore>,
    clock: &SharedClock,
) -> TokenBucket {
    TokenBucket::new(
        scope,
        limits.capacity,
        limits.refill_rate,
        Arc::clone(store),
        Arc::clone(clock),
    )
}

/// `X-RateLimit-*` headers for `decision`.
#[must_use]
pub fn rate_limit_headers(decision: &RateDecision) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        HeaderName::from_static(HEADER_LIMIT),
        HeaderValue::from(decision.capacity),
    );
    headers.insert(
        HeaderName::from_static(HEADER_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RESET),
        HeaderValue::from(decision.reset_at),
    );
    headers
}
