pub mod error;
pub mod middleware;
pub mod service;
pub mod sessions;
pub mod signing;
pub mod tokens;

pub use error::{AuthError, SigningError};
pub use middleware::{attach_request_identity, resolve_identity, secrets_match};
pub use service::{bearer_token, AuthenticatedConnection, Handshake, TokenAuthService};
pub use sessions::{AuthStatistics, Session, SessionRegistry};
pub use tokens::{TokenClaims, TokenCodec, TokenType};
