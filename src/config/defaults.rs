//! Default value functions for configuration fields.
//!
//! These back the `#[serde(default = ...)]` attributes throughout the
//! configuration system and the matching `Default` impls.

use super::logging::LogFormat;
use super::rate_limit::TierLimits;
use std::collections::BTreeMap;

/// Signing secret used when none is configured. Rejected in production.
pub const PLACEHOLDER_JWT_SECRET: &str = "change-me-in-production-please-use-a-long-secret";

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    8000
}

// =============================================================================
// Rate Limit Defaults
// =============================================================================

pub const fn default_rate_limit_enabled() -> bool {
    true
}

pub fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

pub const fn default_bucket_ttl_secs() -> u64 {
    3600 // 1 hour
}

pub fn default_default_tier() -> String {
    "free".to_string()
}

pub fn default_tiers() -> BTreeMap<String, TierLimits> {
    BTreeMap::from([
        ("free".to_string(), TierLimits::per_minute(20)),
        ("pro".to_string(), TierLimits::per_minute(100)),
        ("enterprise".to_string(), TierLimits::per_minute(500)),
    ])
}

pub const fn default_ip_limit() -> TierLimits {
    TierLimits::new(60, 1.0)
}

pub fn default_exempt_paths() -> Vec<String> {
    ["/health", "/docs", "/redoc", "/openapi.json", "/favicon.ico"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub const fn default_rate_limit_cleanup_interval_secs() -> u64 {
    60
}

// =============================================================================
// Auth Defaults
// =============================================================================

pub fn default_jwt_secret() -> String {
    PLACEHOLDER_JWT_SECRET.to_string()
}

pub const fn default_access_token_ttl_secs() -> u64 {
    86_400 // 24 hours
}

pub const fn default_refresh_token_ttl_secs() -> u64 {
    604_800 // 7 days
}

pub const fn default_session_timeout_minutes() -> u64 {
    30
}

pub const fn default_session_sweep_interval_secs() -> u64 {
    60
}

// =============================================================================
// WebSocket Defaults
// =============================================================================

pub const fn default_max_connections_per_user() -> usize {
    5
}

pub const fn default_auth_timeout_secs() -> u64 {
    10 // Default auth timeout: 10 seconds
}

pub const fn default_send_timeout_ms() -> u64 {
    5_000
}

pub const fn default_outbound_queue_capacity() -> usize {
    64
}

pub const fn default_max_message_size() -> usize {
    65536 // 64KB
}

// =============================================================================
// Security Defaults
// =============================================================================

pub fn default_cors_origins() -> String {
    "http://localhost:3000,http://localhost:5173".to_string()
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "chat-gateway.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
