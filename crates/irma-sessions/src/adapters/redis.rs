//! Redis-backed `KeyValueClient`.
//!
//! Locks are plain `SET NX PX` keys holding the fencing token; release and
//! TTL inspection go through small Lua scripts so they only act when the
//! stored token still matches.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::error;

use crate::error::StoreError;
use crate::ports::outbound::KeyValueClient;

const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const LOCK_TTL_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pttl", KEYS[1])
else
    return -3
end
"#;

/// Redis client implementing the remote key-value port.
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Connect to the Redis instance at `url` (a `redis://` connection
    /// string). The connection manager reconnects on its own.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let manager = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueClient for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(unavailable)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut con)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut con = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut con)
            .await
            .map_err(unavailable)?;
        Ok(reply.is_some())
    }

    async fn lock_ttl(&self, key: &str, token: &str) -> Result<Option<Duration>, StoreError> {
        let mut con = self.manager.clone();
        let millis: i64 = Script::new(LOCK_TTL_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut con)
            .await
            .map_err(unavailable)?;
        if millis > 0 {
            Ok(Some(Duration::from_millis(millis as u64)))
        } else {
            Ok(None)
        }
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError> {
        let mut con = self.manager.clone();
        let _: i64 = Script::new(UNLOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut con)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    error!(error = %e, "redis command failed");
    StoreError::Unavailable(e.to_string())
}
