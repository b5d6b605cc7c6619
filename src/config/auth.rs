//! Token and session configuration types.

use super::defaults::{
    default_access_token_ttl_secs, default_jwt_secret, default_refresh_token_ttl_secs,
    default_session_sweep_interval_secs, default_session_timeout_minutes,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Authentication configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// HS256 secret for access/refresh tokens; also the default HMAC
    /// message-signing secret
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Separate secret for message signatures (falls back to `jwt_secret`)
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default = "default_access_token_ttl_secs")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: u64,
    /// Sessions idle longer than this are closed by the maintenance sweep
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u64,
    /// Interval between idle-session sweeps (seconds)
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            signing_secret: None,
            access_token_ttl_secs: default_access_token_ttl_secs(),
            refresh_token_ttl_secs: default_refresh_token_ttl_secs(),
            session_timeout_minutes: default_session_timeout_minutes(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes.saturating_mul(60))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        if self.access_token_ttl_secs == 0 {
            anyhow::bail!("auth.access_token_ttl_secs must be greater than zero");
        }
        if self.refresh_token_ttl_secs < self.access_token_ttl_secs {
            anyhow::bail!(
                "auth.refresh_token_ttl_secs ({}) must not be shorter than auth.access_token_ttl_secs ({})",
                self.refresh_token_ttl_secs,
                self.access_token_ttl_secs
            );
        }
        if self.session_timeout_minutes == 0 {
            anyhow::bail!("auth.session_timeout_minutes must be greater than zero");
        }
        if self.session_sweep_interval_secs == 0 {
            anyhow::bail!("auth.session_sweep_interval_secs must be greater than zero");
        }
        Ok(())
    }
}
