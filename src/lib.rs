#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::similar_names
)]

//! # Chat Gateway
//!
//! Admission control and connection management for a chat backend:
//! tiered token-bucket rate limiting in front of every HTTP route, JWT
//! authentication with session tracking, and a WebSocket connection manager
//! with per-user limits and bounded fan-out.
//!
//! Bucket state lives in process memory by default, or in Redis when the
//! `redis` feature is enabled so several instances share one budget.

/// Token issue/verify, sessions and message signatures
pub mod auth;

/// Injectable time source
pub mod clock;

/// Server configuration and environment variables
pub mod config;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// WebSocket message protocol definitions
pub mod protocol;

/// Token buckets, the multi-tier limiter and the HTTP gate
pub mod rate_limit;

/// Connection manager, message routing and maintenance
pub mod server;

/// WebSocket transport and HTTP routes
pub mod websocket;
