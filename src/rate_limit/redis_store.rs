//! Redis-backed bucket store for multi-instance deployments.
//!
//! Consumes run as one server-side Lua script so that the refill, the
//! comparison and the write happen atomically inside Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::StoreError;
use super::store::{BucketState, BucketStore, ConsumeOutcome, ConsumeRequest};

const CONSUME_SCRIPT: &str = r"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local stored = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local tokens = tonumber(stored[1])
local last = tonumber(stored[2])
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

if now > last and rate > 0 then
  tokens = tokens + ((now - last) / 1000.0) * rate
  last = now
end
if tokens > capacity then
  tokens = capacity
end

if tokens >= cost then
  tokens = tokens - cost
  redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill', tostring(last))
  redis.call('EXPIRE', KEYS[1], ttl)
  return {1, tostring(tokens)}
end
return {0, tostring(tokens)}
";

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn unavailable(context: &str, err: &redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("{context}: {err}"))
}

fn parse_tokens(key: &str, raw: &str) -> Result<f64, StoreError> {
    raw.parse::<f64>().map_err(|err| StoreError::Corrupt {
        key: key.to_owned(),
        reason: format!("tokens '{raw}' is not a number: {err}"),
    })
}

/// Store backed by a Redis (or wire-compatible) server.
#[derive(Clone)]
pub struct RedisBucketStore {
    connection: ConnectionManager,
    consume_script: Script,
}

impl RedisBucketStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|err| {
            warn!(error = %err, "Failed to create Redis client for rate limiting");
            unavailable("invalid redis url", &err)
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|err| {
            warn!(error = %err, "Failed to connect to Redis for rate limiting");
            unavailable("connect", &err)
        })?;

        let store = Self {
            connection,
            consume_script: Script::new(CONSUME_SCRIPT),
        };
        store.health_check().await?;
        debug!("Connected to Redis bucket store");
        Ok(store)
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn consume(
        &self,
        key: &str,
        request: &ConsumeRequest,
    ) -> Result<ConsumeOutcome, StoreError> {
        let mut conn = self.connection.clone();
        let (allowed, tokens): (i64, String) = self
            .consume_script
            .key(key)
            .arg(request.capacity)
            .arg(request.refill_rate)
            .arg(request.cost)
            .arg(request.now_ms)
            .arg(ttl_secs(request.ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|err| unavailable("consume script", &err))?;

        Ok(ConsumeOutcome {
            allowed: allowed == 1,
            tokens: parse_tokens(key, &tokens)?,
        })
    }

    async fn peek(&self, key: &str, _now_ms: u64) -> Result<Option<BucketState>, StoreError> {
        let mut conn = self.connection.clone();
        let (tokens, last_refill): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(key)
            .arg("tokens")
            .arg("last_refill")
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable("HMGET", &err))?;

        let (Some(tokens), Some(last_refill)) = (tokens, last_refill) else {
            return Ok(None);
        };

        let last_refill_ms = last_refill
            .parse::<f64>()
            .map_err(|err| StoreError::Corrupt {
                key: key.to_owned(),
                reason: format!("last_refill '{last_refill}' is not a number: {err}"),
            })?;

        Ok(Some(BucketState {
            tokens: parse_tokens(key, &tokens)?,
            last_refill_ms: last_refill_ms.max(0.0) as u64,
        }))
    }

    async fn put(
        &self,
        key: &str,
        state: BucketState,
        ttl: Duration,
        _now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(key)
            .arg("tokens")
            .arg(state.tokens.to_string())
            .arg("last_refill")
            .arg(state.last_refill_ms)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable("HSET", &err))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable("DEL", &err))?;
        Ok(())
    }

    async fn purge_expired(&self, _now_ms: u64) -> usize {
        0
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable("PING", &err))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
