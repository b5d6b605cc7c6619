//! Root configuration types.

use super::auth::AuthConfig;
use super::defaults::default_port;
use super::logging::LoggingConfig;
use super::rate_limit::RateLimitConfig;
use super::security::SecurityConfig;
use super::websocket::WebSocketConfig;
use serde::{Deserialize, Deserializer, Serialize};

/// Root configuration struct for the chat gateway.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            websocket: WebSocketConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Accepts either a single string or a list; env overrides containing commas
/// arrive as lists.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

/// Comma-separated string field that also accepts a JSON list.
pub(crate) fn comma_separated<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(value) => value,
        StringOrList::Many(values) => values.join(","),
    })
}

/// List field that also accepts a single comma-separated string.
pub(crate) fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(value) => value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        StringOrList::Many(values) => values,
    })
}
