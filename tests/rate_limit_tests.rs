//! Token bucket and multi-tier limiter behavior over the public API.

mod test_helpers;

use async_trait::async_trait;
use chat_gateway::clock::{ManualClock, SharedClock};
use chat_gateway::config::{FailurePolicy, RateLimitConfig};
use chat_gateway::metrics::GatewayMetrics;
use chat_gateway::rate_limit::{
    BucketState, BucketStore, ConsumeOutcome, ConsumeRequest, InMemoryBucketStore, LimitScope,
    MultiTierRateLimiter, RateLimitError, RequestContext, RequestIdentity, StoreError, TokenBucket,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{test_config, TEST_EPOCH_MS};

/// Store whose every call fails, standing in for an unreachable Redis.
struct UnavailableStore;

#[async_trait]
impl BucketStore for UnavailableStore {
    async fn consume(&self, _: &str, _: &ConsumeRequest) -> Result<ConsumeOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn peek(&self, _: &str, _: u64) -> Result<Option<BucketState>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _: &str, _: BucketState, _: Duration, _: u64) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn remove(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn purge_expired(&self, _: u64) -> usize {
        0
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}

fn limiter(
    config: &RateLimitConfig,
    store: Arc<dyn BucketStore>,
) -> (MultiTierRateLimiter, Arc<ManualClock>, Arc<GatewayMetrics>) {
    let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
    let metrics = Arc::new(GatewayMetrics::new());
    let limiter =
        MultiTierRateLimiter::new(config, store, clock.clone(), metrics.clone()).unwrap();
    (limiter, clock, metrics)
}

fn user_request(user: &str, tier: &str) -> RequestContext {
    RequestContext::new("198.51.100.7", "/api/messages")
        .with_identity(Some(RequestIdentity::new(user, Some(tier.to_string()))))
}

#[tokio::test]
async fn test_tier_bucket_exhausts_then_refills() {
    let config = test_config().rate_limit;
    let (limiter, clock, metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));
    let ctx = user_request("alice", "free");

    for expected_remaining in [2, 1, 0] {
        let outcome = limiter.admit(&ctx).await.unwrap();
        assert_eq!(outcome.tier, "free");
        assert_eq!(outcome.identity, "user:alice");
        assert_eq!(outcome.decision.remaining, expected_remaining);
    }

    let err = limiter.admit(&ctx).await.unwrap_err();
    match err {
        RateLimitError::Exceeded {
            scope,
            retry_after_secs,
            ..
        } => {
            assert_eq!(scope, LimitScope::Tier("free".into()));
            assert_eq!(retry_after_secs, 20);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // 0.05 tokens/s: one token after 20 seconds
    clock.advance(Duration::from_secs(20));
    assert!(limiter.admit(&ctx).await.is_ok());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.rate_limiting.requests_admitted, 4);
    assert_eq!(snapshot.rate_limiting.tier_rejections, 1);
}

#[tokio::test]
async fn test_tiers_and_users_are_isolated() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    for _ in 0..3 {
        limiter.admit(&user_request("alice", "free")).await.unwrap();
    }
    assert!(limiter.admit(&user_request("alice", "free")).await.is_err());

    // Same user in another tier, and another user in the same tier
    assert!(limiter.admit(&user_request("alice", "pro")).await.is_ok());
    assert!(limiter.admit(&user_request("bob", "free")).await.is_ok());
}

#[tokio::test]
async fn test_unknown_tier_claim_uses_default_tier() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    let outcome = limiter
        .admit(&user_request("carol", "platinum"))
        .await
        .unwrap();
    assert_eq!(outcome.tier, "free");
}

#[tokio::test]
async fn test_anonymous_requests_are_keyed_by_hashed_ip() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    let outcome = limiter
        .admit(&RequestContext::new("203.0.113.9", "/api/messages"))
        .await
        .unwrap();
    assert!(outcome.identity.starts_with("ip:"));
    assert!(!outcome.identity.contains("203.0.113.9"));
    assert_eq!(outcome.identity.len(), "ip:".len() + 16);
}

#[tokio::test]
async fn test_ip_guard_rejects_before_tier_bucket() {
    let mut config = test_config().rate_limit;
    config.ip_limit = chat_gateway::config::TierLimits::new(2, 0.0);
    let (limiter, _clock, metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    limiter.admit(&user_request("alice", "pro")).await.unwrap();
    limiter.admit(&user_request("bob", "pro")).await.unwrap();
    let err = limiter.admit(&user_request("carol", "pro")).await.unwrap_err();
    assert!(matches!(
        err,
        RateLimitError::Exceeded {
            scope: LimitScope::Ip,
            ..
        }
    ));

    // carol's tier bucket was never touched
    let limits = limiter.get_user_limits("carol").await.unwrap();
    assert_eq!(limits["pro"].remaining, 10);
    assert_eq!(metrics.snapshot().rate_limiting.ip_rejections, 1);
}

#[tokio::test]
async fn test_store_failure_fails_closed_by_default() {
    let config = test_config().rate_limit;
    assert_eq!(config.failure_policy, FailurePolicy::Closed);
    let (limiter, _clock, metrics) = limiter(&config, Arc::new(UnavailableStore));

    let err = limiter.admit(&user_request("alice", "free")).await.unwrap_err();
    assert!(matches!(err, RateLimitError::StoreUnavailable(_)));
    assert_eq!(metrics.snapshot().rate_limiting.store_failures, 1);
}

#[tokio::test]
async fn test_store_failure_fails_open_when_configured() {
    let mut config = test_config().rate_limit;
    config.failure_policy = FailurePolicy::Open;
    let (limiter, _clock, metrics) = limiter(&config, Arc::new(UnavailableStore));

    let outcome = limiter.admit(&user_request("alice", "free")).await.unwrap();
    assert!(outcome.decision.allowed);
    assert_eq!(outcome.decision.remaining, outcome.decision.capacity);

    let snapshot = metrics.snapshot();
    // IP guard and tier bucket both hit the store
    assert_eq!(snapshot.rate_limiting.store_failures, 2);
    assert_eq!(snapshot.rate_limiting.store_failures_admitted, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumes_never_exceed_capacity() {
    let clock: SharedClock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
    let bucket = Arc::new(TokenBucket::new(
        "tier:burst",
        25,
        0.0,
        Arc::new(InMemoryBucketStore::new()),
        clock,
    ));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move { bucket.consume("shared", 1).await.unwrap().allowed })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 25);
}

#[tokio::test]
async fn test_reset_user_limit_restores_capacity() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    for _ in 0..3 {
        limiter.admit(&user_request("alice", "free")).await.unwrap();
    }
    assert!(limiter.admit(&user_request("alice", "free")).await.is_err());

    let reset = limiter.reset_user_limit("alice", None).await.unwrap();
    assert_eq!(reset, vec!["free".to_string(), "pro".to_string()]);
    assert!(limiter.admit(&user_request("alice", "free")).await.is_ok());
}

#[tokio::test]
async fn test_resetting_one_tier_leaves_other_tiers_untouched() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));

    for _ in 0..3 {
        limiter.admit(&user_request("alice", "free")).await.unwrap();
    }
    for _ in 0..4 {
        limiter.admit(&user_request("alice", "pro")).await.unwrap();
    }

    let reset = limiter.reset_user_limit("alice", Some("free")).await.unwrap();
    assert_eq!(reset, vec!["free".to_string()]);

    let limits = limiter.get_user_limits("alice").await.unwrap();
    assert_eq!(limits["free"].remaining, limits["free"].capacity);
    assert_eq!(limits["free"].remaining, 3);
    assert_eq!(limits["pro"].remaining, 6);
}

#[tokio::test]
async fn test_drained_bucket_refills_in_proportion_to_elapsed_time() {
    let config = test_config().rate_limit;
    let (limiter, clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));
    let ctx = user_request("bob", "pro");

    for _ in 0..10 {
        limiter.admit(&ctx).await.unwrap();
    }
    assert!(limiter.admit(&ctx).await.is_err());
    assert_eq!(limiter.get_user_limits("bob").await.unwrap()["pro"].remaining, 0);

    // 1 token/s over 5 seconds
    clock.advance(Duration::from_secs(5));
    assert_eq!(limiter.get_user_limits("bob").await.unwrap()["pro"].remaining, 5);

    for _ in 0..5 {
        limiter.admit(&ctx).await.unwrap();
    }
    assert!(limiter.admit(&ctx).await.is_err());
}

#[tokio::test]
async fn test_shrinking_tier_clamps_stored_tokens() {
    let config = test_config().rate_limit;
    let (limiter, _clock, _metrics) = limiter(&config, Arc::new(InMemoryBucketStore::new()));
    let ctx = user_request("carol", "pro");

    let first = limiter.admit(&ctx).await.unwrap();
    assert_eq!(first.decision.remaining, 9);

    let updated = limiter.update_tier_limits("pro", 2, 0.0).unwrap();
    assert_eq!(updated.capacity, 2);

    let limits = limiter.get_user_limits("carol").await.unwrap();
    assert_eq!(limits["pro"].capacity, 2);
    assert!(limits["pro"].remaining <= 2);

    // Exactly the new capacity is admitted, not the 9 tokens stored before
    for expected_remaining in [1, 0] {
        let outcome = limiter.admit(&ctx).await.unwrap();
        assert_eq!(outcome.decision.remaining, expected_remaining);
    }
    match limiter.admit(&ctx).await.unwrap_err() {
        RateLimitError::Exceeded { scope, .. } => {
            assert_eq!(scope, LimitScope::Tier("pro".into()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Over any schedule of requests, admissions never exceed the initial
    /// capacity plus what the refill rate could have produced.
    #[test]
    fn prop_admissions_bounded_by_capacity_and_refill(
        capacity in 1u32..20,
        refill_per_sec in 0.0f64..5.0,
        gaps_ms in proptest::collection::vec(0u64..2_000, 1..60),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
            let bucket = TokenBucket::new(
                "tier:prop",
                capacity,
                refill_per_sec,
                Arc::new(InMemoryBucketStore::new()),
                clock.clone(),
            );

            let mut admitted = 0u64;
            let mut elapsed_ms = 0u64;
            for gap in gaps_ms {
                clock.advance(Duration::from_millis(gap));
                elapsed_ms += gap;
                let decision = bucket.consume("client", 1).await.unwrap();
                prop_assert!(decision.remaining <= capacity);
                if decision.allowed {
                    admitted += 1;
                }
            }

            let refilled = refill_per_sec * elapsed_ms as f64 / 1000.0;
            // Small slack for accumulated floating-point refill error
            let bound = f64::from(capacity) + (refilled + 1e-6).floor();
            prop_assert!(admitted as f64 <= bound);
            Ok(())
        })?;
    }
}
