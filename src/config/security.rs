//! Security configuration types.

use super::defaults::default_cors_origins;
use serde::{Deserialize, Serialize};

/// Security configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Allowed CORS origins (comma-separated, or "*" for any)
    #[serde(
        default = "default_cors_origins",
        deserialize_with = "super::types::comma_separated"
    )]
    pub cors_origins: String,
    /// Bearer token required on admin routes. Admin routes are open when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: default_cors_origins(),
            admin_token: None,
        }
    }
}

impl SecurityConfig {
    /// Configured admin token, ignoring empty strings.
    #[must_use]
    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}
