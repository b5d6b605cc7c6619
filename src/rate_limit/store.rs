//! Bucket state storage.
//!
//! The store's [`BucketStore::consume`] is the only way bucket state is
//! advanced, and every backend performs it as a single atomic
//! read-modify-write, so concurrent consumes on one key never overdraw.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::StoreError;

/// Persisted state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    pub tokens: f64,
    /// Epoch milliseconds of the last successful consume.
    pub last_refill_ms: u64,
}

impl BucketState {
    #[must_use]
    pub fn full(capacity: u32, now_ms: u64) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill_ms: now_ms,
        }
    }

    /// Continuous refill up to `capacity`. A clock that moved backwards adds
    /// nothing and keeps the later timestamp.
    #[must_use]
    pub fn refilled(&self, capacity: u32, refill_rate: f64, now_ms: u64) -> Self {
        let elapsed_secs = now_ms.saturating_sub(self.last_refill_ms) as f64 / 1000.0;
        let gained = if refill_rate.is_finite() && refill_rate > 0.0 {
            elapsed_secs * refill_rate
        } else {
            0.0
        };
        let tokens = (self.tokens + gained).clamp(0.0, f64::from(capacity));
        Self {
            tokens,
            last_refill_ms: self.last_refill_ms.max(now_ms),
        }
    }
}

/// Parameters of one consume attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeRequest {
    pub capacity: u32,
    pub refill_rate: f64,
    pub cost: u32,
    pub now_ms: u64,
    pub ttl: Duration,
}

/// Result of one consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    /// Tokens left after the consume, or the refilled level when rejected.
    pub tokens: f64,
}

/// Refill then consume. Returns the outcome and the state to persist, which
/// is `None` on rejection (rejected attempts leave the stored state alone).
#[must_use]
pub fn apply_consume(
    current: Option<BucketState>,
    request: &ConsumeRequest,
) -> (ConsumeOutcome, Option<BucketState>) {
    let state = current.map_or_else(
        || BucketState::full(request.capacity, request.now_ms),
        |state| state.refilled(request.capacity, request.refill_rate, request.now_ms),
    );
    let cost = f64::from(request.cost);

    if state.tokens >= cost {
        let next = BucketState {
            tokens: state.tokens - cost,
            last_refill_ms: state.last_refill_ms,
        };
        (
            ConsumeOutcome {
                allowed: true,
                tokens: next.tokens,
            },
            Some(next),
        )
    } else {
        (
            ConsumeOutcome {
                allowed: false,
                tokens: state.tokens,
            },
            None,
        )
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Backend holding per-identifier bucket state with expiration.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically refill, consume and persist the bucket at `key`.
    async fn consume(
        &self,
        key: &str,
        request: &ConsumeRequest,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Read the stored state without modifying it. Expired entries read as absent.
    async fn peek(&self, key: &str, now_ms: u64) -> Result<Option<BucketState>, StoreError>;

    /// Overwrite the state at `key`.
    async fn put(
        &self,
        key: &str,
        state: BucketState,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired entries; returns how many were removed. Backends with
    /// native expiry return 0.
    async fn purge_expired(&self, now_ms: u64) -> usize;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Short backend name for diagnostics.
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    state: BucketState,
    expires_at_ms: u64,
}

impl StoredBucket {
    fn live_state(&self, now_ms: u64) -> Option<BucketState> {
        (self.expires_at_ms > now_ms).then_some(self.state)
    }
}

/// Process-local store. Each consume runs under the DashMap shard lock held
/// by the entry for its key.
#[derive(Debug, Default)]
pub struct InMemoryBucketStore {
    buckets: DashMap<String, StoredBucket>,
}

impl InMemoryBucketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn consume(
        &self,
        key: &str,
        request: &ConsumeRequest,
    ) -> Result<ConsumeOutcome, StoreError> {
        let now = request.now_ms;
        let expires_at_ms = now.saturating_add(duration_millis(request.ttl));

        let outcome = match self.buckets.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().live_state(now);
                let (outcome, next) = apply_consume(current, request);
                match (next, current) {
                    (Some(state), _) => {
                        occupied.insert(StoredBucket {
                            state,
                            expires_at_ms,
                        });
                    }
                    (None, None) => {
                        occupied.remove();
                    }
                    (None, Some(_)) => {}
                }
                outcome
            }
            Entry::Vacant(vacant) => {
                let (outcome, next) = apply_consume(None, request);
                if let Some(state) = next {
                    vacant.insert(StoredBucket {
                        state,
                        expires_at_ms,
                    });
                }
                outcome
            }
        };

        Ok(outcome)
    }

    async fn peek(&self, key: &str, now_ms: u64) -> Result<Option<BucketState>, StoreError> {
        Ok(self
            .buckets
            .get(key)
            .and_then(|stored| stored.live_state(now_ms)))
    }

    async fn put(
        &self,
        key: &str,
        state: BucketState,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.buckets.insert(
            key.to_owned(),
            StoredBucket {
                state,
                expires_at_ms: now_ms.saturating_add(duration_millis(ttl)),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.buckets.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, stored| stored.expires_at_ms > now_ms);
        before.saturating_sub(self.buckets.len())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
