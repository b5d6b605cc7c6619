//! JWT issuing and verification plus per-user connection accounting.

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::{AuthError, SigningError};
use super::sessions::{AuthStatistics, Session, SessionRegistry};
use super::signing;
use super::tokens::{TokenClaims, TokenCodec, TokenType};
use crate::clock::SharedClock;
use crate::config::AuthConfig;

/// Credentials captured from a WebSocket upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// `token` query parameter.
    pub query_token: Option<String>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

impl Handshake {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.query_token.as_deref().is_some_and(|t| !t.is_empty())
            || self.authorization.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Token from an `Authorization` header value, with or without the `Bearer ` prefix.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    (!token.is_empty()).then_some(token)
}

#[derive(Debug, Clone)]
pub struct AuthenticatedConnection {
    pub user_id: String,
    pub session_id: Uuid,
    pub claims: TokenClaims,
}

/// Issues and verifies tokens and owns the session registry.
#[derive(Debug)]
pub struct TokenAuthService {
    codec: TokenCodec,
    signing_secret: Vec<u8>,
    sessions: SessionRegistry,
    clock: SharedClock,
}

impl TokenAuthService {
    pub fn new(config: &AuthConfig, clock: SharedClock) -> Self {
        let signing_secret = config
            .signing_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .unwrap_or(&config.jwt_secret);

        Self {
            codec: TokenCodec::new(
                config.jwt_secret.as_bytes(),
                Duration::from_secs(config.access_token_ttl_secs),
                Duration::from_secs(config.refresh_token_ttl_secs),
            ),
            signing_secret: signing_secret.as_bytes().to_vec(),
            sessions: SessionRegistry::new(),
            clock,
        }
    }

    pub fn generate_access_token(
        &self,
        user_id: &str,
        extra_claims: Option<Map<String, Value>>,
    ) -> Result<String, AuthError> {
        self.codec
            .issue_access(user_id, extra_claims, self.clock.now_secs())
    }

    pub fn generate_refresh_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.codec.issue_refresh(user_id, self.clock.now_secs())
    }

    pub fn verify_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.codec.verify(token, self.clock.now_secs())
    }

    /// Verify `token` and require it to be an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.verify_token(token)?;
        claims.require_type(TokenType::Access)?;
        Ok(claims)
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh_access_token(&self, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.verify_token(refresh_token)?;
        claims.require_type(TokenType::Refresh)?;
        let user_id = claims.require_user_id()?;
        let token = self.generate_access_token(user_id, None)?;
        debug!(user_id = %user_id, "Issued access token from refresh token");
        Ok(token)
    }

    /// Resolve a token (explicit, then query parameter, then `Authorization`
    /// header), verify it and open a session.
    pub fn authenticate_connection(
        &self,
        handshake: &Handshake,
        token: Option<&str>,
    ) -> Result<AuthenticatedConnection, AuthError> {
        let token = token
            .filter(|t| !t.is_empty())
            .or_else(|| handshake.query_token.as_deref().filter(|t| !t.is_empty()))
            .or_else(|| handshake.authorization.as_deref().and_then(bearer_token))
            .ok_or(AuthError::MissingToken)?;

        let claims = self.verify_access_token(token).inspect_err(|err| {
            warn!(error = %err, "WebSocket authentication failed");
        })?;
        let user_id = claims.require_user_id()?.to_owned();

        let session = self
            .sessions
            .open(&user_id, claims.clone(), self.clock.now_utc());
        info!(
            user_id = %user_id,
            session_id = %session.session_id,
            connections = self.sessions.user_connection_count(&user_id),
            "Authenticated WebSocket session"
        );

        Ok(AuthenticatedConnection {
            user_id,
            session_id: session.session_id,
            claims,
        })
    }

    /// Close a session and release its connection count. Idempotent.
    pub fn close_session(&self, session_id: Uuid) -> Option<Session> {
        let session = self.sessions.close(session_id)?;
        debug!(
            user_id = %session.user_id,
            session_id = %session_id,
            "Closed auth session"
        );
        Some(session)
    }

    pub fn touch_session(&self, session_id: Uuid) -> Result<(), AuthError> {
        if self.sessions.touch(session_id, self.clock.now_utc()) {
            Ok(())
        } else {
            Err(AuthError::SessionNotFound(session_id))
        }
    }

    #[must_use]
    pub fn get_session(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.get(session_id)
    }

    #[must_use]
    pub fn user_sessions(&self, user_id: &str) -> Vec<Session> {
        self.sessions.user_sessions(user_id)
    }

    #[must_use]
    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.sessions.user_connection_count(user_id)
    }

    /// HMAC-SHA256 of `message`; `secret` defaults to the configured signing secret.
    pub fn create_signature(
        &self,
        message: &Value,
        secret: Option<&[u8]>,
    ) -> Result<String, SigningError> {
        signing::create_signature(message, secret.unwrap_or(self.signing_secret.as_slice()))
    }

    #[must_use]
    pub fn validate_signature(&self, message: &Value, signature: &str, secret: Option<&[u8]>) -> bool {
        signing::verify_signature(
            message,
            signature,
            secret.unwrap_or(self.signing_secret.as_slice()),
        )
    }

    /// Close every session idle for longer than `timeout` and return their ids.
    pub fn cleanup_stale_sessions(&self, timeout: Duration) -> Vec<Uuid> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = self
            .clock
            .now_utc()
            .checked_sub_signed(timeout)
            .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);

        let stale: Vec<Uuid> = self
            .sessions
            .idle_since(cutoff)
            .into_iter()
            .filter(|session_id| self.close_session(*session_id).is_some())
            .collect();

        if !stale.is_empty() {
            info!(count = stale.len(), "Cleaned up stale sessions");
        }
        stale
    }

    #[must_use]
    pub fn statistics(&self) -> AuthStatistics {
        self.sessions.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> (TokenAuthService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let config = AuthConfig {
            jwt_secret: "service-test-secret-0123456789abcdef".into(),
            ..AuthConfig::default()
        };
        (TokenAuthService::new(&config, clock.clone()), clock)
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token(""), None);
    }

    #[test]
    fn test_token_resolution_order() {
        let (service, _clock) = service();
        let alice = service.generate_access_token("alice", None).unwrap();
        let bob = service.generate_access_token("bob", None).unwrap();
        let carol = service.generate_access_token("carol", None).unwrap();

        let handshake = Handshake {
            query_token: Some(bob.clone()),
            authorization: Some(format!("Bearer {carol}")),
        };
        let explicit = service
            .authenticate_connection(&handshake, Some(&alice))
            .unwrap();
        assert_eq!(explicit.user_id, "alice");

        let query = service.authenticate_connection(&handshake, None).unwrap();
        assert_eq!(query.user_id, "bob");

        let header_only = Handshake {
            query_token: None,
            authorization: Some(format!("Bearer {carol}")),
        };
        let header = service.authenticate_connection(&header_only, None).unwrap();
        assert_eq!(header.user_id, "carol");
    }

    #[test]
    fn test_missing_token() {
        let (service, _clock) = service();
        assert_eq!(
            service
                .authenticate_connection(&Handshake::default(), None)
                .unwrap_err(),
            AuthError::MissingToken
        );
    }

    #[test]
    fn test_refresh_token_cannot_open_connection() {
        let (service, _clock) = service();
        let refresh = service.generate_refresh_token("alice").unwrap();
        let err = service
            .authenticate_connection(&Handshake::default(), Some(&refresh))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidTokenType { expected: "access", .. }));
        assert_eq!(service.user_connection_count("alice"), 0);
    }

    #[test]
    fn test_refresh_requires_refresh_token() {
        let (service, _clock) = service();
        let access = service.generate_access_token("alice", None).unwrap();
        assert!(matches!(
            service.refresh_access_token(&access),
            Err(AuthError::InvalidTokenType { expected: "refresh", .. })
        ));

        let refresh = service.generate_refresh_token("alice").unwrap();
        let fresh = service.refresh_access_token(&refresh).unwrap();
        assert_eq!(service.verify_access_token(&fresh).unwrap().user_id, "alice");
    }

    #[test]
    fn test_refresh_without_user_id() {
        let (service, _clock) = service();
        let refresh = service.generate_refresh_token("").unwrap();
        assert_eq!(
            service.refresh_access_token(&refresh),
            Err(AuthError::MissingUserId)
        );
    }

    #[test]
    fn test_expired_access_token() {
        let (service, clock) = service();
        let token = service.generate_access_token("alice", None).unwrap();
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(service.verify_token(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn test_stale_session_cleanup() {
        let (service, clock) = service();
        let token = service.generate_access_token("alice", None).unwrap();
        let idle = service
            .authenticate_connection(&Handshake::default(), Some(&token))
            .unwrap();
        let active = service
            .authenticate_connection(&Handshake::default(), Some(&token))
            .unwrap();

        clock.advance(Duration::from_secs(20 * 60));
        service.touch_session(active.session_id).unwrap();
        clock.advance(Duration::from_secs(15 * 60));

        let removed = service.cleanup_stale_sessions(Duration::from_secs(30 * 60));
        assert_eq!(removed, vec![idle.session_id]);
        assert_eq!(service.user_connection_count("alice"), 1);
        assert!(service.get_session(active.session_id).is_some());
    }

    #[test]
    fn test_signature_defaults_to_jwt_secret() {
        let (service, _clock) = service();
        let message = json!({"b": 2, "a": 1});
        let signature = service.create_signature(&message, None).unwrap();

        assert_eq!(
            signature,
            signing::create_signature(&message, b"service-test-secret-0123456789abcdef").unwrap()
        );
        assert!(service.validate_signature(&message, &signature, None));
        assert!(!service.validate_signature(&message, &signature, Some(b"other".as_slice())));
    }

    #[test]
    fn test_touch_unknown_session() {
        let (service, _clock) = service();
        let id = Uuid::new_v4();
        assert_eq!(service.touch_session(id), Err(AuthError::SessionNotFound(id)));
    }
}
