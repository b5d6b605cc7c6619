use crate::auth::TokenAuthService;
use crate::clock::{system_clock, SharedClock};
use crate::config::{Config, StorageBackend};
use crate::metrics::GatewayMetrics;
use crate::rate_limit::{BucketStore, GateState, InMemoryBucketStore, MultiTierRateLimiter};
use anyhow::{Context, Result};
use std::sync::Arc;

mod connection_manager;
mod maintenance;
mod message_router;

pub use connection_manager::{
    ConnectError, ConnectionInfo, ConnectionManager, ConnectionState, ConnectionStatistics,
    OutboundFrame, SessionInfo,
};

/// Shared state behind every route and WebSocket task.
pub struct GatewayServer {
    config: Config,
    /// Admission control for HTTP requests
    limiter: Arc<MultiTierRateLimiter>,
    /// JWT issue/verify, sessions and signatures
    auth: Arc<TokenAuthService>,
    /// Live WebSocket sessions of this instance
    connections: Arc<ConnectionManager>,
    pub(crate) metrics: Arc<GatewayMetrics>,
    clock: SharedClock,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("port", &self.config.port)
            .field("limiter", &self.limiter)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Build the server with the bucket store selected by `config`.
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let store = build_store(&config).await?;
        Self::with_store(config, store, system_clock())
    }

    /// Build the server over an explicit store and clock.
    pub fn with_store(
        config: Config,
        store: Arc<dyn BucketStore>,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        let metrics = Arc::new(GatewayMetrics::new());
        let limiter = Arc::new(
            MultiTierRateLimiter::new(
                &config.rate_limit,
                store,
                Arc::clone(&clock),
                Arc::clone(&metrics),
            )
            .context("invalid rate limit configuration")?,
        );
        let auth = Arc::new(TokenAuthService::new(&config.auth, Arc::clone(&clock)));
        let connections = Arc::new(ConnectionManager::new(
            &config.websocket,
            Arc::clone(&auth),
            Arc::clone(&metrics),
            Arc::clone(&clock),
        ));

        tracing::info!(
            backend = limiter.backend_name(),
            tiers = config.rate_limit.tiers.len(),
            default_tier = %config.rate_limit.default_tier,
            max_connections_per_user = config.websocket.max_connections_per_user,
            "Gateway server initialized"
        );

        Ok(Arc::new(Self {
            config,
            limiter,
            auth,
            connections,
            metrics,
            clock,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<MultiTierRateLimiter> {
        &self.limiter
    }

    pub fn auth(&self) -> &Arc<TokenAuthService> {
        &self.auth
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// State for the rate-limit gate middleware.
    pub fn gate_state(&self) -> GateState {
        GateState {
            limiter: Arc::clone(&self.limiter),
            enabled: self.config.rate_limit.enabled,
            trust_forwarded_for: self.config.rate_limit.trust_forwarded_for,
            enable_timing: self.config.rate_limit.enable_timing,
        }
    }

    /// Liveness plus store reachability.
    pub async fn health_check(&self) -> bool {
        match self.limiter.store_health().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Bucket store health check failed");
                false
            }
        }
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn BucketStore>> {
    match config.rate_limit.storage {
        StorageBackend::Memory => Ok(Arc::new(InMemoryBucketStore::new())),
        #[cfg(feature = "redis")]
        StorageBackend::Redis => {
            let store = crate::rate_limit::RedisBucketStore::connect(&config.rate_limit.redis_url)
                .await
                .context("failed to connect to the Redis bucket store")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StorageBackend::Redis => {
            anyhow::bail!("rate_limit.storage is 'redis' but the redis feature is not compiled in")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_with_store_wires_components() {
        let clock = Arc::new(ManualClock::new(1_000));
        let server = GatewayServer::with_store(
            Config::default(),
            Arc::new(InMemoryBucketStore::new()),
            clock,
        )
        .unwrap();

        assert_eq!(server.limiter().backend_name(), "memory");
        assert_eq!(server.connections().max_connections_per_user(), 5);
        assert!(server.gate_state().enabled);
        assert!(server.health_check().await);
    }

    #[tokio::test]
    async fn test_unknown_default_tier_is_rejected() {
        let mut config = Config::default();
        config.rate_limit.default_tier = "platinum".into();
        let result = GatewayServer::with_store(
            config,
            Arc::new(InMemoryBucketStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        assert!(result.is_err());
    }
}
