// WebSocket transport and HTTP surface
//
// - handler: `/ws/chat` upgrade handler (entry point)
// - connection: per-socket reader loop and in-band authentication
// - sending: writer task draining the session queue
// - admin: connection manager admin endpoints
// - rate_limits: rate limiter management endpoints
// - routes: router assembly and middleware layering

mod admin;
mod connection;
mod handler;
mod rate_limits;
mod routes;
mod sending;

pub use admin::{broadcast_announcement, disconnect_session, list_sessions, websocket_stats};
pub use handler::{chat_websocket_handler, ChatQuery};
pub use rate_limits::{TierLimitUpdate, UserLimitReset};
pub use routes::create_router;
