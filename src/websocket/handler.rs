use crate::auth::Handshake;
use crate::server::GatewayServer;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

use super::connection::handle_socket;

#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    /// Access token, as an alternative to the `Authorization` header
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler for `/ws/chat`.
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<GatewayServer>>,
    Query(query): Query<ChatQuery>,
    headers: HeaderMap,
) -> Response {
    let handshake = Handshake {
        query_token: query.token,
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
    };

    // Frames up to four times the protocol limit reach the router and get an
    // in-band error; anything larger is dropped by the transport.
    let transport_limit = server
        .config()
        .websocket
        .max_message_size
        .saturating_mul(4);

    ws.max_message_size(transport_limit)
        .on_upgrade(move |socket| handle_socket(socket, server, handshake))
}
