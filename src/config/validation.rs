//! Configuration validation functions.

use super::defaults::PLACEHOLDER_JWT_SECRET;
use super::rate_limit::StorageBackend;
use super::Config;

/// Minimum HS256 secret length accepted in production.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Validate every section and the production-only secret requirements.
pub fn validate_config_security(config: &Config) -> anyhow::Result<()> {
    let is_prod = is_production_mode();

    let secret = &config.auth.jwt_secret;
    if is_prod {
        if secret == PLACEHOLDER_JWT_SECRET {
            anyhow::bail!(
                "\nCRITICAL: auth.jwt_secret is still the built-in placeholder!\n\
                 ===================================================================\n\
                 Configure a strong signing secret:\n\
                 export CHAT_GATEWAY__AUTH__JWT_SECRET=\"$(openssl rand -hex 32)\"\n\
                 ===================================================================\n"
            );
        }
        if secret.len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!(
                "auth.jwt_secret must be at least {MIN_JWT_SECRET_BYTES} bytes in production (configured: {} bytes)",
                secret.len()
            );
        }
        if config.security.admin_token().is_none() {
            eprintln!(
                "\nSECURITY WARNING: Admin routes are unauthenticated in production!\n\
                 ===================================================================\n\
                 /ws/sessions, /ws/broadcast and /api/rate-limits/* are publicly reachable.\n\
                 \n\
                 To protect them:\n\
                 export CHAT_GATEWAY__SECURITY__ADMIN_TOKEN=\"$(openssl rand -hex 32)\"\n\
                 ===================================================================\n"
            );
        }
    } else if secret.len() < MIN_JWT_SECRET_BYTES {
        eprintln!(
            "\nWARNING: auth.jwt_secret is very short ({} bytes).\n\
             Recommended: At least {MIN_JWT_SECRET_BYTES} bytes.\n\
             Generate a strong secret: openssl rand -hex 32\n",
            secret.len()
        );
    }

    if let Some(token) = config.security.admin_token() {
        if token.len() < 16 {
            eprintln!(
                "\nWARNING: Admin token is very short ({} chars).\n\
                 Recommended: At least 32 characters for security.\n",
                token.len()
            );
        }
    }

    if config.rate_limit.storage == StorageBackend::Redis && !cfg!(feature = "redis") {
        anyhow::bail!(
            "rate_limit.storage is \"redis\" but this binary was built without the `redis` feature"
        );
    }

    config.rate_limit.validate()?;
    config.auth.validate()?;
    config.websocket.validate()?;

    Ok(())
}

/// Detect if we're running in production mode.
///
/// Checks `CHAT_GATEWAY_ENV` first, then the generic `PRODUCTION` / `PROD` variables.
pub fn is_production_mode() -> bool {
    use std::env;

    if let Ok(mode) = env::var("CHAT_GATEWAY_ENV") {
        let mode = mode.to_lowercase();
        return mode == "production" || mode == "prod";
    }

    env::var("PRODUCTION").is_ok() || env::var("PROD").is_ok()
}
