//! WebSocket close codes used by the gateway.

/// Server is shutting down, the session idled out, or an operator closed it.
pub const GOING_AWAY: u16 = 1001;

/// Unexpected server-side failure.
pub const INTERNAL_ERROR: u16 = 1011;

/// Missing, invalid or expired credentials, or authentication timed out.
pub const AUTH_FAILED: u16 = 4001;

/// The user already holds the maximum number of concurrent connections.
pub const CONNECTION_LIMIT: u16 = 4008;
