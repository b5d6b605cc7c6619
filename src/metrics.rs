use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for admission control and the WebSocket layer.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Rate limiting metrics
    pub requests_admitted: AtomicU64,
    pub ip_rejections: AtomicU64,
    pub tier_rejections: AtomicU64,
    pub store_failures: AtomicU64,
    /// Store failures that were admitted under the fail-open policy
    pub store_failures_admitted: AtomicU64,
    pub buckets_purged: AtomicU64,

    // Connection metrics
    pub total_connections: AtomicU64,
    pub active_connections: AtomicU64,
    pub disconnections: AtomicU64,
    pub auth_failures: AtomicU64,
    pub connection_limit_rejections: AtomicU64,
    pub idle_sessions_closed: AtomicU64,

    // Message metrics
    pub messages_received: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub protocol_errors: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub rate_limiting: RateLimitingMetrics,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitingMetrics {
    pub requests_admitted: u64,
    pub ip_rejections: u64,
    pub tier_rejections: u64,
    pub store_failures: u64,
    pub store_failures_admitted: u64,
    pub buckets_purged: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectionMetrics {
    pub total_connections: u64,
    pub active_connections: u64,
    pub disconnections: u64,
    pub auth_failures: u64,
    pub connection_limit_rejections: u64,
    pub idle_sessions_closed: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageMetrics {
    pub messages_received: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub protocol_errors: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Rate limiting metrics
    pub fn increment_requests_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_ip_rejections(&self) {
        self.ip_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tier_rejections(&self) {
        self.tier_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_failures(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_failures_admitted(&self) {
        self.store_failures_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_buckets_purged(&self, count: u64) {
        if count > 0 {
            self.buckets_purged.fetch_add(count, Ordering::Relaxed);
        }
    }

    // Connection metrics
    pub fn increment_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active_connections(&self) {
        // fetch_update keeps the gauge from underflowing
        let _ =
            self.active_connections
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                    current.checked_sub(1)
                });
        self.disconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auth_failures(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connection_limit_rejections(&self) {
        self.connection_limit_rejections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_idle_sessions_closed(&self, count: u64) {
        if count > 0 {
            self.idle_sessions_closed.fetch_add(count, Ordering::Relaxed);
        }
    }

    // Message metrics
    pub fn increment_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Snapshot generation
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            rate_limiting: RateLimitingMetrics {
                requests_admitted: self.requests_admitted.load(Ordering::Relaxed),
                ip_rejections: self.ip_rejections.load(Ordering::Relaxed),
                tier_rejections: self.tier_rejections.load(Ordering::Relaxed),
                store_failures: self.store_failures.load(Ordering::Relaxed),
                store_failures_admitted: self.store_failures_admitted.load(Ordering::Relaxed),
                buckets_purged: self.buckets_purged.load(Ordering::Relaxed),
            },
            connections: ConnectionMetrics {
                total_connections: self.total_connections.load(Ordering::Relaxed),
                active_connections: self.active_connections.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
                auth_failures: self.auth_failures.load(Ordering::Relaxed),
                connection_limit_rejections: self
                    .connection_limit_rejections
                    .load(Ordering::Relaxed),
                idle_sessions_closed: self.idle_sessions_closed.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
                delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_connections_never_underflow() {
        let metrics = GatewayMetrics::new();
        metrics.decrement_active_connections();
        metrics.increment_connections();
        metrics.decrement_active_connections();
        metrics.decrement_active_connections();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active_connections, 0);
        assert_eq!(snapshot.connections.total_connections, 1);
        assert_eq!(snapshot.connections.disconnections, 3);
    }

    #[test]
    fn test_snapshot_reflects_rate_limit_counters() {
        let metrics = GatewayMetrics::new();
        metrics.increment_requests_admitted();
        metrics.increment_tier_rejections();
        metrics.increment_store_failures();
        metrics.add_buckets_purged(4);

        let snapshot = metrics.snapshot().rate_limiting;
        assert_eq!(snapshot.requests_admitted, 1);
        assert_eq!(snapshot.tier_rejections, 1);
        assert_eq!(snapshot.store_failures, 1);
        assert_eq!(snapshot.buckets_purged, 4);
    }
}
