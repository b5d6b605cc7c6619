use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::GatewayServer;

impl GatewayServer {
    /// Periodic idle-session sweep and bucket purge. Runs until the task is
    /// dropped.
    pub async fn maintenance_task(&self) {
        let mut session_sweep = tokio::time::interval(Duration::from_secs(
            self.config.auth.session_sweep_interval_secs.max(1),
        ));
        session_sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut bucket_purge = tokio::time::interval(Duration::from_secs(
            self.config.rate_limit.cleanup_interval_secs.max(1),
        ));
        bucket_purge.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = session_sweep.tick() => {
                    self.run_session_sweep().await;
                }
                _ = bucket_purge.tick() => {
                    self.run_bucket_purge().await;
                }
            }
        }
    }

    /// Close sessions idle longer than the configured session timeout.
    pub async fn run_session_sweep(&self) -> usize {
        let closed = self
            .connections
            .sweep_idle_sessions(self.config.auth.session_timeout())
            .await;
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "Closed idle sessions");
        }
        closed.len()
    }

    pub async fn run_bucket_purge(&self) -> usize {
        let removed = self.limiter.purge_expired().await;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired rate limit buckets");
        }
        removed
    }
}
