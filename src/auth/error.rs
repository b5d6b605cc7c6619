use thiserror::Error;
use uuid::Uuid;

/// Token and session errors returned by the token auth service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing authentication token")]
    MissingToken,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Invalid token: {0}")]
    TokenInvalid(String),
    #[error("Invalid token type: expected {expected}, found {found}")]
    InvalidTokenType {
        expected: &'static str,
        found: String,
    },
    #[error("Token does not carry a user id")]
    MissingUserId,
    /// Encoding a new token failed.
    #[error("Failed to issue token: {0}")]
    TokenIssue(String),
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),
}

/// Failures while computing a message signature.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("message could not be canonicalized: {0}")]
    Canonicalization(#[from] serde_json::Error),
}
