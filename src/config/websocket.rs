//! WebSocket configuration types.

use super::defaults::{
    default_auth_timeout_secs, default_max_connections_per_user, default_max_message_size,
    default_outbound_queue_capacity, default_send_timeout_ms,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSocketConfig {
    /// Concurrent connections allowed per user
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    /// Authentication timeout in seconds (time allowed for clients to authenticate)
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// Upper bound for delivering one frame to one session
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Frames buffered per session before sends start waiting
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum inbound text frame size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections_per_user: default_max_connections_per_user(),
            auth_timeout_secs: default_auth_timeout_secs(),
            send_timeout_ms: default_send_timeout_ms(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl WebSocketConfig {
    #[must_use]
    pub const fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Validate WebSocket configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections_per_user == 0 {
            anyhow::bail!("websocket.max_connections_per_user must be at least 1");
        }
        // Validate auth timeout: must be between 5 and 60 seconds
        if self.auth_timeout_secs < 5 {
            anyhow::bail!(
                "websocket.auth_timeout_secs must be at least 5 seconds (configured: {})",
                self.auth_timeout_secs
            );
        }
        if self.auth_timeout_secs > 60 {
            anyhow::bail!(
                "websocket.auth_timeout_secs must not exceed 60 seconds (configured: {})",
                self.auth_timeout_secs
            );
        }
        if self.send_timeout_ms == 0 {
            anyhow::bail!("websocket.send_timeout_ms must be greater than zero");
        }
        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("websocket.outbound_queue_capacity must be at least 1");
        }
        if self.max_message_size < 128 {
            anyhow::bail!(
                "websocket.max_message_size must be at least 128 bytes (configured: {})",
                self.max_message_size
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_connections_per_user, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_timeout_bounds() {
        let mut config = WebSocketConfig {
            auth_timeout_secs: 4,
            ..WebSocketConfig::default()
        };
        assert!(config.validate().is_err());
        config.auth_timeout_secs = 61;
        assert!(config.validate().is_err());
        config.auth_timeout_secs = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_connection_cap_is_rejected() {
        let config = WebSocketConfig {
            max_connections_per_user: 0,
            ..WebSocketConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
