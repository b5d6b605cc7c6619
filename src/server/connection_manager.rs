//! Live WebSocket sessions indexed by session and user.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, AuthStatistics, Handshake, TokenAuthService};
use crate::clock::SharedClock;
use crate::config::WebSocketConfig;
use crate::metrics::GatewayMetrics;
use crate::protocol::close_codes;
use crate::protocol::ServerMessage;

/// Frame queued for a session's writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Message(Arc<ServerMessage>),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Connection limit exceeded for user {user_id} ({current}/{limit})")]
    ConnectionLimitExceeded {
        user_id: String,
        current: usize,
        limit: usize,
    },
}

impl ConnectError {
    #[must_use]
    pub const fn close_code(&self) -> u16 {
        match self {
            Self::Auth(_) => close_codes::AUTH_FAILED,
            Self::ConnectionLimitExceeded { .. } => close_codes::CONNECTION_LIMIT,
        }
    }

    /// Reason string sent in the close frame.
    #[must_use]
    pub const fn close_reason(&self) -> &'static str {
        match self {
            Self::Auth(_) => "Authentication failed",
            Self::ConnectionLimitExceeded { .. } => "Connection limit exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Open,
    /// A close frame has been queued; removal follows.
    Closing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub session_id: Uuid,
    pub user_id: String,
    /// Connections the user holds including this one.
    pub connection_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub user_id: String,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatistics {
    pub total_connections: usize,
    pub unique_users: usize,
    pub max_connections_per_user: usize,
    pub connections_by_user: BTreeMap<String, usize>,
    pub auth_stats: AuthStatistics,
}

#[derive(Debug)]
struct ConnectionEntry {
    user_id: String,
    sender: mpsc::Sender<OutboundFrame>,
    state: ConnectionState,
    connected_at: DateTime<Utc>,
}

/// Both indexes live behind one lock so they never disagree.
#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<Uuid, ConnectionEntry>,
    user_sessions: HashMap<String, Vec<Uuid>>,
}

impl Registry {
    fn user_count(&self, user_id: &str) -> usize {
        self.user_sessions.get(user_id).map_or(0, Vec::len)
    }

    fn remove(&mut self, session_id: Uuid) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&session_id)?;
        if let Some(sessions) = self.user_sessions.get_mut(&entry.user_id) {
            sessions.retain(|id| *id != session_id);
            if sessions.is_empty() {
                self.user_sessions.remove(&entry.user_id);
            }
        }
        Some(entry)
    }
}

/// Live WebSocket sessions of this instance.
pub struct ConnectionManager {
    registry: RwLock<Registry>,
    auth: Arc<TokenAuthService>,
    metrics: Arc<GatewayMetrics>,
    clock: SharedClock,
    max_connections_per_user: usize,
    send_timeout: Duration,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_connections_per_user", &self.max_connections_per_user)
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        config: &WebSocketConfig,
        auth: Arc<TokenAuthService>,
        metrics: Arc<GatewayMetrics>,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            auth,
            metrics,
            clock,
            max_connections_per_user: config.max_connections_per_user,
            send_timeout: config.send_timeout(),
        }
    }

    #[must_use]
    pub const fn max_connections_per_user(&self) -> usize {
        self.max_connections_per_user
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<TokenAuthService> {
        &self.auth
    }

    /// Authenticate and register a connection whose writer drains `sender`.
    ///
    /// On failure a close frame is queued on `sender` before returning.
    pub async fn connect(
        &self,
        sender: mpsc::Sender<OutboundFrame>,
        handshake: &Handshake,
        token: Option<&str>,
    ) -> Result<ConnectionInfo, ConnectError> {
        let authenticated = match self.auth.authenticate_connection(handshake, token) {
            Ok(authenticated) => authenticated,
            Err(err) => {
                self.metrics.increment_auth_failures();
                let err = ConnectError::from(err);
                queue_close(&sender, err.close_code(), err.close_reason());
                return Err(err);
            }
        };
        let session_id = authenticated.session_id;
        let user_id = authenticated.user_id;

        let reserved = {
            let mut registry = self.registry.write().await;
            let current = registry.user_count(&user_id);
            if current >= self.max_connections_per_user {
                Err(current)
            } else {
                registry.connections.insert(
                    session_id,
                    ConnectionEntry {
                        user_id: user_id.clone(),
                        sender: sender.clone(),
                        state: ConnectionState::Open,
                        connected_at: self.clock.now_utc(),
                    },
                );
                let sessions = registry.user_sessions.entry(user_id.clone()).or_default();
                sessions.push(session_id);
                Ok(sessions.len())
            }
        };

        let connection_count = match reserved {
            Ok(count) => count,
            Err(current) => {
                self.auth.close_session(session_id);
                self.metrics.increment_connection_limit_rejections();
                warn!(
                    user_id = %user_id,
                    current,
                    limit = self.max_connections_per_user,
                    "Per-user connection limit exceeded"
                );
                let err = ConnectError::ConnectionLimitExceeded {
                    user_id,
                    current,
                    limit: self.max_connections_per_user,
                };
                queue_close(&sender, err.close_code(), err.close_reason());
                return Err(err);
            }
        };

        self.metrics.increment_connections();
        info!(
            user_id = %user_id,
            session_id = %session_id,
            connections = connection_count,
            "WebSocket connected"
        );

        self.deliver(
            session_id,
            sender,
            Arc::new(ServerMessage::AuthSuccess {
                session_id,
                user_id: user_id.clone(),
                authenticated: true,
                timestamp: self.clock.now_utc(),
            }),
        )
        .await;

        Ok(ConnectionInfo {
            session_id,
            user_id,
            connection_count,
        })
    }

    /// Remove a session from both indexes and close its auth session.
    /// Dropping the stored sender ends the writer task. Idempotent.
    pub async fn disconnect(&self, session_id: Uuid) -> bool {
        let removed = self.registry.write().await.remove(session_id);
        let Some(entry) = removed else {
            return false;
        };

        self.auth.close_session(session_id);
        self.metrics.decrement_active_connections();
        info!(
            user_id = %entry.user_id,
            session_id = %session_id,
            "WebSocket disconnected"
        );
        true
    }

    /// Queue a close frame, then disconnect.
    pub async fn force_disconnect(&self, session_id: Uuid, code: u16, reason: &str) -> bool {
        let sender = {
            let mut registry = self.registry.write().await;
            registry.connections.get_mut(&session_id).map(|entry| {
                entry.state = ConnectionState::Closing;
                entry.sender.clone()
            })
        };
        let Some(sender) = sender else {
            return false;
        };

        let frame = OutboundFrame::Close {
            code,
            reason: reason.to_owned(),
        };
        if let Err(err) = sender.send_timeout(frame, self.send_timeout).await {
            debug!(session_id = %session_id, error = %err, "Close frame not delivered");
        }
        drop(sender);
        self.disconnect(session_id).await
    }

    /// Bounded delivery to one session; failure disconnects it.
    async fn deliver(
        &self,
        session_id: Uuid,
        sender: mpsc::Sender<OutboundFrame>,
        message: Arc<ServerMessage>,
    ) -> bool {
        match sender
            .send_timeout(OutboundFrame::Message(message), self.send_timeout)
            .await
        {
            Ok(()) => {
                self.metrics.increment_messages_delivered();
                true
            }
            Err(err) => {
                self.metrics.increment_delivery_failures();
                warn!(session_id = %session_id, error = %err, "Failed to deliver message; disconnecting");
                drop(sender);
                self.disconnect(session_id).await;
                false
            }
        }
    }

    async fn fan_out(
        &self,
        targets: Vec<(Uuid, mpsc::Sender<OutboundFrame>)>,
        message: ServerMessage,
    ) -> usize {
        let message = Arc::new(message);
        join_all(
            targets
                .into_iter()
                .map(|(session_id, sender)| self.deliver(session_id, sender, Arc::clone(&message))),
        )
        .await
        .into_iter()
        .filter(|delivered| *delivered)
        .count()
    }

    async fn senders_where<F>(&self, mut include: F) -> Vec<(Uuid, mpsc::Sender<OutboundFrame>)>
    where
        F: FnMut(&Uuid, &ConnectionEntry) -> bool,
    {
        self.registry
            .read()
            .await
            .connections
            .iter()
            .filter(|(session_id, entry)| {
                entry.state == ConnectionState::Open && include(*session_id, *entry)
            })
            .map(|(session_id, entry)| (*session_id, entry.sender.clone()))
            .collect()
    }

    pub async fn send_to_session(&self, session_id: Uuid, message: ServerMessage) -> bool {
        let sender = self
            .registry
            .read()
            .await
            .connections
            .get(&session_id)
            .map(|entry| entry.sender.clone());
        match sender {
            Some(sender) => self.deliver(session_id, sender, Arc::new(message)).await,
            None => false,
        }
    }

    pub async fn send_to_user(&self, user_id: &str, message: ServerMessage) -> usize {
        let targets = self.senders_where(|_, entry| entry.user_id == user_id).await;
        self.fan_out(targets, message).await
    }

    /// Deliver to every open session except `exclude`.
    pub async fn broadcast(&self, message: ServerMessage, exclude: &[Uuid]) -> usize {
        let targets = self
            .senders_where(|session_id, _| !exclude.contains(session_id))
            .await;
        self.fan_out(targets, message).await
    }

    pub async fn broadcast_to_users(&self, user_ids: &[String], message: ServerMessage) -> usize {
        let users: HashSet<&str> = user_ids.iter().map(String::as_str).collect();
        let targets = self
            .senders_where(|_, entry| users.contains(entry.user_id.as_str()))
            .await;
        self.fan_out(targets, message).await
    }

    /// Broadcast a typing indicator to everyone except the typing user's own sessions.
    pub async fn send_typing_indicator(
        &self,
        conversation_id: &str,
        user_id: &str,
        is_typing: bool,
    ) -> usize {
        let message = ServerMessage::TypingIndicator {
            conversation_id: conversation_id.to_owned(),
            user_id: user_id.to_owned(),
            is_typing,
            timestamp: self.clock.now_utc(),
        };
        let targets = self.senders_where(|_, entry| entry.user_id != user_id).await;
        self.fan_out(targets, message).await
    }

    /// Record inbound activity for `session_id`.
    pub fn touch(&self, session_id: Uuid) -> bool {
        self.auth.touch_session(session_id).is_ok()
    }

    pub async fn handle_heartbeat(&self, session_id: Uuid) -> bool {
        self.touch(session_id);
        self.send_to_session(
            session_id,
            ServerMessage::Pong {
                timestamp: self.clock.now_utc(),
            },
        )
        .await
    }

    /// Close sessions idle longer than `timeout` in both registries.
    pub async fn sweep_idle_sessions(&self, timeout: Duration) -> Vec<Uuid> {
        let stale = self.auth.cleanup_stale_sessions(timeout);
        for session_id in &stale {
            self.force_disconnect(*session_id, close_codes::GOING_AWAY, "Session expired")
                .await;
        }
        self.metrics.add_idle_sessions_closed(stale.len() as u64);
        stale
    }

    pub async fn session_info(&self, session_id: Uuid) -> Option<SessionInfo> {
        let registry = self.registry.read().await;
        let entry = registry.connections.get(&session_id)?;
        Some(self.describe(session_id, entry))
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let registry = self.registry.read().await;
        let mut sessions: Vec<SessionInfo> = registry
            .connections
            .iter()
            .map(|(session_id, entry)| self.describe(*session_id, entry))
            .collect();
        sessions.sort_by_key(|session| session.connected_at);
        sessions
    }

    fn describe(&self, session_id: Uuid, entry: &ConnectionEntry) -> SessionInfo {
        SessionInfo {
            session_id,
            user_id: entry.user_id.clone(),
            state: entry.state,
            connected_at: entry.connected_at,
            last_activity: self
                .auth
                .get_session(session_id)
                .map(|session| session.last_activity),
        }
    }

    pub async fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .registry
            .read()
            .await
            .user_sessions
            .keys()
            .cloned()
            .collect();
        users.sort();
        users
    }

    pub async fn user_connection_count(&self, user_id: &str) -> usize {
        self.registry.read().await.user_count(user_id)
    }

    pub async fn statistics(&self) -> ConnectionStatistics {
        let registry = self.registry.read().await;
        ConnectionStatistics {
            total_connections: registry.connections.len(),
            unique_users: registry.user_sessions.len(),
            max_connections_per_user: self.max_connections_per_user,
            connections_by_user: registry
                .user_sessions
                .iter()
                .map(|(user_id, sessions)| (user_id.clone(), sessions.len()))
                .collect(),
            auth_stats: self.auth.statistics(),
        }
    }

    /// Close every session with `GOING_AWAY`.
    pub async fn shutdown(&self) -> usize {
        let session_ids: Vec<Uuid> = self
            .registry
            .read()
            .await
            .connections
            .keys()
            .copied()
            .collect();
        let closed = join_all(session_ids.iter().map(|session_id| {
            self.force_disconnect(*session_id, close_codes::GOING_AWAY, "Server shutting down")
        }))
        .await
        .into_iter()
        .filter(|closed| *closed)
        .count();

        info!(closed, "Connection manager shut down");
        closed
    }
}

fn queue_close(sender: &mpsc::Sender<OutboundFrame>, code: u16, reason: &str) {
    let frame = OutboundFrame::Close {
        code,
        reason: reason.to_owned(),
    };
    if sender.try_send(frame).is_err() {
        debug!(code, "Could not queue close frame");
    }
}
