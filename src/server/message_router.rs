use uuid::Uuid;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

use super::GatewayServer;

impl GatewayServer {
    /// Handle one inbound text frame from an authenticated session.
    pub async fn handle_client_text(&self, session_id: Uuid, user_id: &str, text: &str) {
        self.metrics.increment_messages_received();

        let limit = self.config.websocket.max_message_size;
        if text.len() > limit {
            self.reply_protocol_error(
                session_id,
                &ProtocolError::MessageTooLarge {
                    size: text.len(),
                    limit,
                },
            )
            .await;
            return;
        }

        self.connections.touch(session_id);

        match ClientMessage::parse(text) {
            Ok(message) => self.handle_client_message(session_id, user_id, message).await,
            Err(err) => self.reply_protocol_error(session_id, &err).await,
        }
    }

    /// Dispatch a parsed message.
    pub async fn handle_client_message(
        &self,
        session_id: Uuid,
        user_id: &str,
        message: ClientMessage,
    ) {
        match message {
            ClientMessage::Auth { .. } => {
                tracing::debug!(%session_id, %user_id, "Ignoring auth message on an open session");
                self.connections
                    .send_to_session(session_id, ServerMessage::error("Already authenticated"))
                    .await;
            }
            ClientMessage::Ping => {
                self.connections.handle_heartbeat(session_id).await;
            }
            ClientMessage::Message {
                conversation_id,
                content,
                message_id,
            } => {
                tracing::info!(
                    %session_id,
                    %user_id,
                    %conversation_id,
                    content_len = content.len(),
                    "Chat message received"
                );
                self.connections
                    .send_to_session(
                        session_id,
                        ServerMessage::MessageReceived {
                            message_id,
                            conversation_id,
                            status: "received".into(),
                        },
                    )
                    .await;
            }
            ClientMessage::Typing {
                conversation_id,
                is_typing,
            } => {
                self.connections
                    .send_typing_indicator(&conversation_id, user_id, is_typing)
                    .await;
            }
            ClientMessage::Subscribe { conversation_id } => {
                tracing::info!(%session_id, %conversation_id, "Subscribed to conversation");
                self.connections
                    .send_to_session(
                        session_id,
                        ServerMessage::Subscribed {
                            conversation_id,
                            status: "subscribed".into(),
                        },
                    )
                    .await;
            }
        }
    }

    async fn reply_protocol_error(&self, session_id: Uuid, err: &ProtocolError) {
        self.metrics.increment_protocol_errors();
        tracing::debug!(%session_id, error = %err, "Rejected client frame");
        self.connections
            .send_to_session(session_id, ServerMessage::from(err))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::Handshake;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::protocol::ServerMessage;
    use crate::rate_limit::InMemoryBucketStore;
    use crate::server::{GatewayServer, OutboundFrame};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn connected(
        server: &GatewayServer,
        user_id: &str,
    ) -> (Uuid, mpsc::Receiver<OutboundFrame>) {
        let token = server.auth().generate_access_token(user_id, None).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let info = server
            .connections()
            .connect(tx, &Handshake::default(), Some(&token))
            .await
            .unwrap();
        // auth_success
        rx.recv().await.unwrap();
        (info.session_id, rx)
    }

    fn server() -> Arc<GatewayServer> {
        let mut config = Config::default();
        config.websocket.max_message_size = 256;
        GatewayServer::with_store(
            config,
            Arc::new(InMemoryBucketStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
        .unwrap()
    }

    async fn next_message(rx: &mut mpsc::Receiver<OutboundFrame>) -> ServerMessage {
        match rx.recv().await {
            Some(OutboundFrame::Message(message)) => (*message).clone(),
            other => panic!("expected a message frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_is_acknowledged() {
        let server = server();
        let (session_id, mut rx) = connected(&server, "alice").await;

        server
            .handle_client_text(
                session_id,
                "alice",
                r#"{"type":"message","data":{"conversation_id":"c1","content":"hi","message_id":"m1"}}"#,
            )
            .await;

        assert_eq!(
            next_message(&mut rx).await,
            ServerMessage::MessageReceived {
                message_id: Some("m1".into()),
                conversation_id: "c1".into(),
                status: "received".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let server = server();
        let (session_id, mut rx) = connected(&server, "alice").await;

        server
            .handle_client_text(session_id, "alice", r#"{"type":"ping"}"#)
            .await;
        assert!(matches!(
            next_message(&mut rx).await,
            ServerMessage::Pong { .. }
        ));
    }

    #[tokio::test]
    async fn test_protocol_errors_are_reported() {
        let server = server();
        let (session_id, mut rx) = connected(&server, "alice").await;

        server.handle_client_text(session_id, "alice", "nope").await;
        assert_eq!(next_message(&mut rx).await, ServerMessage::error("Invalid JSON"));

        server
            .handle_client_text(session_id, "alice", r#"{"type":"dance"}"#)
            .await;
        assert_eq!(
            next_message(&mut rx).await,
            ServerMessage::error("Unknown message type: dance")
        );

        let oversized = format!(r#"{{"type":"ping","data":{{"pad":"{}"}}}}"#, "x".repeat(300));
        server
            .handle_client_text(session_id, "alice", &oversized)
            .await;
        match next_message(&mut rx).await {
            ServerMessage::Error { message } => assert!(message.starts_with("Message too large")),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(server.metrics().snapshot().messages.protocol_errors, 3);
    }

    #[tokio::test]
    async fn test_typing_reaches_other_users_only() {
        let server = server();
        let (alice, mut alice_rx) = connected(&server, "alice").await;
        let (_bob, mut bob_rx) = connected(&server, "bob").await;

        server
            .handle_client_text(
                alice,
                "alice",
                r#"{"type":"typing","data":{"conversation_id":"c1","is_typing":true}}"#,
            )
            .await;

        match next_message(&mut bob_rx).await {
            ServerMessage::TypingIndicator {
                user_id, is_typing, ..
            } => {
                assert_eq!(user_id, "alice");
                assert!(is_typing);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(alice_rx.try_recv().is_err());
    }
}
