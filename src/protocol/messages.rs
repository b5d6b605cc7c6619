//! Client and server frames of the chat WebSocket protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Raw `{type, data}` frame as sent by clients.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
    /// Some clients put the auth token next to `type` instead of in `data`.
    #[serde(default)]
    token: Option<String>,
}

/// Message types sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// In-band authentication, only accepted before the session is open
    Auth { token: String },
    /// Heartbeat to maintain connection
    Ping,
    /// Chat message for a conversation
    Message {
        conversation_id: String,
        content: String,
        message_id: Option<String>,
    },
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    Subscribe { conversation_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Missing message type")]
    MissingType,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("{0}")]
    InvalidPayload(String),
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Message too large ({size} bytes, limit {limit})")]
    MessageTooLarge { size: usize, limit: usize },
}

/// Identifier fields may arrive as JSON strings or numbers.
fn id_field(data: &Value, name: &str) -> Option<String> {
    match data.get(name)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn text_field(data: &Value, name: &str) -> Option<String> {
    data.get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

impl ClientMessage {
    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidJson)?;
        let data = match envelope.data {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        let kind = envelope.kind.ok_or(ProtocolError::MissingType)?;

        match kind.as_str() {
            "auth" => envelope
                .token
                .filter(|token| !token.is_empty())
                .or_else(|| text_field(&data, "token"))
                .map(|token| Self::Auth { token })
                .ok_or(ProtocolError::MissingToken),
            "ping" => Ok(Self::Ping),
            "message" => {
                match (
                    id_field(&data, "conversation_id"),
                    text_field(&data, "content"),
                ) {
                    (Some(conversation_id), Some(content)) => Ok(Self::Message {
                        conversation_id,
                        content,
                        message_id: id_field(&data, "message_id"),
                    }),
                    _ => Err(ProtocolError::InvalidPayload(
                        "Missing conversation_id or content".into(),
                    )),
                }
            }
            "typing" => {
                let conversation_id = id_field(&data, "conversation_id").ok_or_else(|| {
                    ProtocolError::InvalidPayload("Missing conversation_id".into())
                })?;
                let is_typing = data
                    .get("is_typing")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Self::Typing {
                    conversation_id,
                    is_typing,
                })
            }
            "subscribe" => id_field(&data, "conversation_id")
                .map(|conversation_id| Self::Subscribe { conversation_id })
                .ok_or_else(|| ProtocolError::InvalidPayload("Missing conversation_id".into())),
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

/// Message types sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess {
        session_id: Uuid,
        user_id: String,
        authenticated: bool,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    MessageReceived {
        message_id: Option<String>,
        conversation_id: String,
        status: String,
    },
    Subscribed {
        conversation_id: String,
        status: String,
    },
    TypingIndicator {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    /// Operator broadcast; the payload is passed through untouched
    Announcement(Value),
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::AuthSuccess { .. } => "auth_success",
            Self::Pong { .. } => "pong",
            Self::MessageReceived { .. } => "message_received",
            Self::Subscribed { .. } => "subscribed",
            Self::TypingIndicator { .. } => "typing_indicator",
            Self::Announcement(_) => "announcement",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(err: &ProtocolError) -> Self {
        Self::error(err.to_string())
    }
}
