//! Authenticated session registry and per-user connection counts.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::tokens::TokenClaims;

/// One authenticated connection.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip)]
    pub claims: TokenClaims,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AuthStatistics {
    pub active_sessions: usize,
    pub unique_users: usize,
    pub total_connections: usize,
    pub sessions_by_user: BTreeMap<String, usize>,
}

/// Sessions keyed by id plus a live connection counter per user.
///
/// A user's counter equals the number of its sessions; the entry is removed
/// when it reaches zero.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
    user_connections: DashMap<String, usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, user_id: &str, claims: TokenClaims, now: DateTime<Utc>) -> Session {
        let session = Session {
            session_id: Uuid::new_v4(),
            user_id: user_id.to_owned(),
            created_at: now,
            last_activity: now,
            claims,
        };
        self.sessions.insert(session.session_id, session.clone());
        *self.user_connections.entry(user_id.to_owned()).or_insert(0) += 1;
        session
    }

    /// Remove a session and release its connection slot. Unknown ids are a no-op.
    pub fn close(&self, session_id: Uuid) -> Option<Session> {
        let (_, session) = self.sessions.remove(&session_id)?;
        if let Entry::Occupied(mut count) = self.user_connections.entry(session.user_id.clone()) {
            if *count.get() <= 1 {
                count.remove();
            } else {
                *count.get_mut() -= 1;
            }
        }
        Some(session)
    }

    /// Refresh `last_activity`. Returns false for unknown sessions.
    pub fn touch(&self, session_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                if now > session.last_activity {
                    session.last_activity = now;
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn user_sessions(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    #[must_use]
    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.user_connections
            .get(user_id)
            .map_or(0, |count| *count.value())
    }

    /// Ids of sessions whose last activity is older than `cutoff`.
    #[must_use]
    pub fn idle_since(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.sessions
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| *entry.key())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn statistics(&self) -> AuthStatistics {
        let sessions_by_user: BTreeMap<String, usize> = self
            .user_connections
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        AuthStatistics {
            active_sessions: self.sessions.len(),
            unique_users: sessions_by_user.len(),
            total_connections: sessions_by_user.values().sum(),
            sessions_by_user,
        }
    }
}
