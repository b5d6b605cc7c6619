//! Continuous-refill token bucket for one scope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error::StoreError;
use super::store::{BucketState, BucketStore, ConsumeRequest};
use super::BUCKET_KEY_PREFIX;
use crate::clock::SharedClock;

/// Result of one consume attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub capacity: u32,
    /// Epoch seconds at which the bucket is projected to be full again.
    pub reset_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    #[must_use]
    pub const fn allowed(capacity: u32, remaining: u32, reset_at: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            capacity,
            reset_at,
            retry_after_secs: None,
        }
    }

    #[must_use]
    pub const fn rejected(capacity: u32, reset_at: u64, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            capacity,
            reset_at,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Read-only projection of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub capacity: u32,
    pub remaining: u32,
    /// Fractional token level when the snapshot was taken.
    pub tokens: f64,
    pub refill_rate: f64,
    pub reset_at: u64,
}

/// Token bucket bound to one scope (`ip_guard`, `tier:free`, ...).
///
/// Identifiers are appended to the scope to form the store key, so the same
/// identity gets independent buckets in different scopes.
pub struct TokenBucket {
    scope: String,
    capacity: u32,
    refill_rate: f64,
    ttl: Duration,
    store: Arc<dyn BucketStore>,
    clock: SharedClock,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("scope", &self.scope)
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("ttl", &self.ttl)
            .field("store", &self.store.backend_name())
            .finish()
    }
}

impl TokenBucket {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    pub fn new(
        scope: impl Into<String>,
        capacity: u32,
        refill_rate: f64,
        store: Arc<dyn BucketStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            scope: scope.into(),
            capacity,
            refill_rate,
            ttl: Self::DEFAULT_TTL,
            store,
            clock,
        }
    }

    /// Inactivity period after which stored state expires.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn key(&self, identifier: &str) -> String {
        format!("{BUCKET_KEY_PREFIX}:{}:{identifier}", self.scope)
    }

    /// Try to take `cost` tokens for `identifier`.
    pub async fn consume(&self, identifier: &str, cost: u32) -> Result<RateDecision, StoreError> {
        let now_ms = self.clock.now_millis();
        let key = self.key(identifier);
        let request = ConsumeRequest {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            cost,
            now_ms,
            ttl: self.ttl,
        };

        let outcome = self.store.consume(&key, &request).await?;
        let reset_at = self.reset_at(outcome.tokens, now_ms);

        if outcome.allowed {
            let remaining = whole_tokens(outcome.tokens);
            debug!(key = %key, remaining, capacity = self.capacity, "Token bucket consume allowed");
            Ok(RateDecision::allowed(self.capacity, remaining, reset_at))
        } else {
            let retry_after = self.retry_after_secs(outcome.tokens, cost);
            debug!(key = %key, retry_after, "Token bucket consume rejected");
            Ok(RateDecision::rejected(self.capacity, reset_at, retry_after))
        }
    }

    /// Project the current level for `identifier` without consuming.
    pub async fn peek(&self, identifier: &str) -> Result<BucketSnapshot, StoreError> {
        let now_ms = self.clock.now_millis();
        let tokens = self
            .store
            .peek(&self.key(identifier), now_ms)
            .await?
            .map_or(f64::from(self.capacity), |state| {
                state.refilled(self.capacity, self.refill_rate, now_ms).tokens
            });

        Ok(BucketSnapshot {
            capacity: self.capacity,
            remaining: whole_tokens(tokens),
            tokens,
            refill_rate: self.refill_rate,
            reset_at: self.reset_at(tokens, now_ms),
        })
    }

    /// Force the bucket for `identifier` back to full capacity.
    pub async fn reset(&self, identifier: &str) -> Result<(), StoreError> {
        let now_ms = self.clock.now_millis();
        self.store
            .put(
                &self.key(identifier),
                BucketState::full(self.capacity, now_ms),
                self.ttl,
                now_ms,
            )
            .await
    }

    /// Upper bound for any wait reported to clients. State expires after the
    /// TTL and the bucket is recreated full, so nothing takes longer.
    fn horizon_secs(&self) -> f64 {
        self.ttl.as_secs_f64()
    }

    fn seconds_until(&self, missing_tokens: f64) -> f64 {
        if missing_tokens <= 0.0 {
            return 0.0;
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return self.horizon_secs();
        }
        (missing_tokens / self.refill_rate).min(self.horizon_secs())
    }

    fn reset_at(&self, tokens: f64, now_ms: u64) -> u64 {
        let now_secs = now_ms as f64 / 1000.0;
        let missing = f64::from(self.capacity) - tokens;
        (now_secs + self.seconds_until(missing)).ceil() as u64
    }

    fn retry_after_secs(&self, tokens: f64, cost: u32) -> u64 {
        let wait = self.seconds_until(f64::from(cost) - tokens).ceil() as u64;
        wait.max(1)
    }
}

fn whole_tokens(tokens: f64) -> u32 {
    if tokens <= 0.0 {
        0
    } else {
        tokens.floor().min(f64::from(u32::MAX)) as u32
    }
}
