//! Configuration module for the chat gateway.
//!
//! This module provides configuration management with support for:
//! - JSON configuration files
//! - Environment variable overrides
//! - Stdin input
//! - Sensible defaults
//!
//! # Module Structure
//!
//! - [`crate::config::types`]: Root `Config` struct
//! - [`rate_limit`]: Token-bucket tiers, IP guard and storage backend
//! - [`auth`]: Token lifetimes, secrets and session expiry
//! - [`websocket`]: WebSocket connection settings
//! - [`security`]: CORS and admin route protection
//! - [`logging`]: Logging configuration
//! - [`crate::config::loader`]: Configuration loading functions
//! - [`crate::config::validation`]: Configuration validation functions
//! - [`crate::config::defaults`]: Default value functions

pub mod auth;
pub mod defaults;
pub mod loader;
pub mod logging;
pub mod rate_limit;
pub mod security;
pub mod types;
pub mod validation;
pub mod websocket;

pub use auth::AuthConfig;

pub use loader::load;

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use rate_limit::{FailurePolicy, RateLimitConfig, StorageBackend, TierLimits};

pub use security::SecurityConfig;

pub use types::Config;

pub use validation::{is_production_mode, validate_config_security};

pub use websocket::WebSocketConfig;
