use crate::protocol::ServerMessage;
use crate::server::OutboundFrame;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::mpsc;

type WsSink = SplitSink<WebSocket, Message>;

fn encode_server_message(message: &ServerMessage) -> String {
    match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, kind = message.type_name(), "Failed to serialize server message");
            "{\"type\":\"error\",\"data\":{\"message\":\"Internal error\"}}".to_string()
        }
    }
}

pub(super) async fn send_server_message(
    sink: &mut WsSink,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(encode_server_message(message).into()))
        .await
}

pub(super) async fn send_close(sink: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(code, error = %err, "Failed to send close frame");
    }
}

/// Drain the session queue into the socket. Ends when the queue closes,
/// after a close frame, or when the socket rejects a write.
pub(super) async fn write_frames(
    mut sink: WsSink,
    mut frames: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            OutboundFrame::Message(message) => {
                if let Err(err) = send_server_message(&mut sink, &message).await {
                    tracing::debug!(error = %err, "WebSocket write failed");
                    return;
                }
            }
            OutboundFrame::Close { code, reason } => {
                send_close(&mut sink, code, &reason).await;
                return;
            }
        }
    }

    let _ = sink.close().await;
}
