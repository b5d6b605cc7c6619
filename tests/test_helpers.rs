use chat_gateway::clock::ManualClock;
use chat_gateway::config::{Config, TierLimits};
use chat_gateway::rate_limit::InMemoryBucketStore;
use chat_gateway::server::GatewayServer;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Epoch milliseconds the manual clocks start at.
#[allow(dead_code)]
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

#[allow(dead_code)]
pub const TEST_JWT_SECRET: &str = "integration-test-secret-that-is-long-enough";

/// Configuration with small, predictable limits for tests
#[allow(dead_code)]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = TEST_JWT_SECRET.to_string();
    config.rate_limit.tiers = BTreeMap::from([
        ("free".to_string(), TierLimits::new(3, 0.05)),
        ("pro".to_string(), TierLimits::new(10, 1.0)),
    ]);
    config.rate_limit.ip_limit = TierLimits::new(100, 10.0);
    config.websocket.max_connections_per_user = 2;
    config
}

/// Server over an in-memory store and a manual clock
#[allow(dead_code)]
pub fn create_test_server_with_config(config: Config) -> (Arc<GatewayServer>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
    let server = GatewayServer::with_store(
        config,
        Arc::new(InMemoryBucketStore::new()),
        clock.clone(),
    )
    .expect("Failed to create test server");
    (server, clock)
}

#[allow(dead_code)]
pub fn create_test_server() -> (Arc<GatewayServer>, Arc<ManualClock>) {
    create_test_server_with_config(test_config())
}
