//! Per-socket lifecycle: handshake auth, reader loop and writer task.

use crate::auth::Handshake;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::{GatewayServer, OutboundFrame};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::sending::write_frames;

/// Result of waiting for an in-band `auth` frame.
enum InBandAuth {
    Token(String),
    /// Timed out, or the first frame was not a usable `auth` message.
    Rejected(&'static str),
    /// The peer went away first.
    Closed,
}

async fn await_auth_message(stream: &mut SplitStream<WebSocket>, timeout: Duration) -> InBandAuth {
    let wait = async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match ClientMessage::parse(text.as_str()) {
                        Ok(ClientMessage::Auth { token }) => InBandAuth::Token(token),
                        Ok(_) => InBandAuth::Rejected("first message must be auth"),
                        Err(_) => InBandAuth::Rejected("malformed auth message"),
                    };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    return InBandAuth::Rejected("binary frames are not supported");
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => return InBandAuth::Closed,
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(InBandAuth::Rejected("authentication timed out"))
}

pub(super) async fn handle_socket(socket: WebSocket, server: Arc<GatewayServer>, handshake: Handshake) {
    let (sink, mut stream) = socket.split();
    let websocket_config = &server.config().websocket;
    let (tx, rx) = mpsc::channel::<OutboundFrame>(websocket_config.outbound_queue_capacity.max(1));
    let mut writer = tokio::spawn(write_frames(sink, rx));

    let in_band_token = if handshake.has_credentials() {
        None
    } else {
        match await_auth_message(&mut stream, websocket_config.auth_timeout()).await {
            InBandAuth::Token(token) => Some(token),
            InBandAuth::Rejected(reason) => {
                tracing::warn!(%reason, "In-band authentication failed");
                // Connecting without a token fails and queues the 4001 close.
                None
            }
            InBandAuth::Closed => {
                drop(tx);
                if let Err(err) = writer.await {
                    tracing::warn!(error = %err, "WebSocket writer task failed");
                }
                return;
            }
        }
    };

    let info = match server
        .connections()
        .connect(tx, &handshake, in_band_token.as_deref())
        .await
    {
        Ok(info) => info,
        Err(err) => {
            tracing::info!(error = %err, close_code = err.close_code(), "WebSocket connection rejected");
            if let Err(err) = writer.await {
                tracing::warn!(error = %err, "WebSocket writer task failed");
            }
            return;
        }
    };
    let session_id = info.session_id;
    let user_id = info.user_id;
    tracing::info!(%session_id, %user_id, connections = info.connection_count, "WebSocket connection established");

    let reader = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    server
                        .handle_client_text(session_id, &user_id, text.as_str())
                        .await;
                }
                Ok(Message::Binary(_)) => {
                    server
                        .connections()
                        .send_to_session(
                            session_id,
                            ServerMessage::error("Binary frames are not supported"),
                        )
                        .await;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    server.connections().touch(session_id);
                }
                Ok(Message::Close(_)) => break,
                Err(err) => {
                    tracing::debug!(%session_id, error = %err, "WebSocket read failed");
                    break;
                }
            }
        }
    };

    let writer_finished = tokio::select! {
        () = reader => false,
        _ = &mut writer => true,
    };

    server.connections().disconnect(session_id).await;
    if !writer_finished {
        // Let queued frames flush now that the sender is gone.
        let flush = websocket_config.send_timeout();
        if tokio::time::timeout(flush, &mut writer).await.is_err() {
            writer.abort();
        }
    }
    tracing::info!(%session_id, %user_id, "WebSocket connection closed");
}
