//! Signed access and refresh tokens.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use super::error::AuthError;

/// Claim names owned by the issuer; extra claims cannot override them.
pub const RESERVED_CLAIMS: [&str; 5] = ["user_id", "type", "iat", "nbf", "exp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub exp: i64,
    /// Caller-supplied claims such as `tier`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Subscription tier carried by the token, if any.
    #[must_use]
    pub fn tier(&self) -> Option<&str> {
        self.extra.get("tier").and_then(Value::as_str)
    }

    pub fn require_type(&self, expected: TokenType) -> Result<(), AuthError> {
        if self.token_type == expected {
            Ok(())
        } else {
            Err(AuthError::InvalidTokenType {
                expected: expected.as_str(),
                found: self.token_type.as_str().to_owned(),
            })
        }
    }

    pub fn require_user_id(&self) -> Result<&str, AuthError> {
        if self.user_id.is_empty() {
            Err(AuthError::MissingUserId)
        } else {
            Ok(&self.user_id)
        }
    }
}

/// HS256 encoder/decoder with lifetimes for both token kinds.
///
/// Signature and structure are checked by `jsonwebtoken`; time-based claims
/// are checked by the caller against its own clock so tests can control time.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &Algorithm::HS256)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Build and sign an access token issued at `now_secs`.
    pub fn issue_access(
        &self,
        user_id: &str,
        extra_claims: Option<Map<String, Value>>,
        now_secs: i64,
    ) -> Result<String, AuthError> {
        let mut extra = extra_claims.unwrap_or_default();
        extra.retain(|name, _| !RESERVED_CLAIMS.contains(&name.as_str()));

        let claims = TokenClaims {
            user_id: user_id.to_owned(),
            token_type: TokenType::Access,
            iat: now_secs,
            nbf: Some(now_secs),
            exp: now_secs.saturating_add(ttl_secs(self.access_ttl)),
            extra,
        };
        self.sign(&claims)
    }

    pub fn issue_refresh(&self, user_id: &str, now_secs: i64) -> Result<String, AuthError> {
        let claims = TokenClaims {
            user_id: user_id.to_owned(),
            token_type: TokenType::Refresh,
            iat: now_secs,
            nbf: None,
            exp: now_secs.saturating_add(ttl_secs(self.refresh_ttl)),
            extra: Map::new(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "Failed to encode token");
            AuthError::TokenIssue(err.to_string())
        })
    }

    /// Verify signature and structure, then expiry and not-before against `now_secs`.
    pub fn verify(&self, token: &str, now_secs: i64) -> Result<TokenClaims, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::InvalidSignature => AuthError::TokenInvalid("invalid signature".into()),
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(err.to_string()),
            },
        )?;

        let claims = data.claims;
        if now_secs >= claims.exp {
            return Err(AuthError::TokenExpired);
        }
        if claims.nbf.is_some_and(|nbf| now_secs < nbf) {
            return Err(AuthError::TokenInvalid("token is not valid yet".into()));
        }
        Ok(claims)
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}
