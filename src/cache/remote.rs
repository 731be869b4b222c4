//! External cache tier.
//!
//! The schema cache only needs three string operations from its external
//! store, so they are expressed as a trait; [`RedisCache`] is the production
//! implementation.

use crate::error::{DbError, DbResult};
use crate::models::mask_url;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Deadline for a single GET, SETEX or DEL.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> DbResult<Option<String>>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()>;
    async fn delete(&self, key: &str) -> DbResult<()>;
}

/// Redis-backed cache tier. The connection manager reconnects on its own.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> DbResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| DbError::cache(format!("Timed out connecting to {}", mask_url(url))))??;
        info!("Connected to Redis schema cache");
        Ok(Self { manager })
    }
}

/// Run one Redis command, turning a stall past `limit` into a cache error.
async fn within<T, F>(command: &str, limit: Duration, fut: F) -> DbResult<T>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DbError::cache(format!(
            "Redis {} timed out after {}ms",
            command,
            limit.as_millis()
        ))),
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let mut conn = self.manager.clone();
        within("GET", COMMAND_TIMEOUT, conn.get::<_, Option<String>>(key)).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> DbResult<()> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        within(
            "SETEX",
            COMMAND_TIMEOUT,
            conn.set_ex::<_, _, ()>(key, value, secs),
        )
        .await
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        let mut conn = self.manager.clone();
        within("DEL", COMMAND_TIMEOUT, conn.del::<_, ()>(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stalled_command_becomes_cache_error() {
        let stalled = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, redis::RedisError>(Some("late".to_string()))
        };
        let err = within("GET", Duration::from_millis(50), stalled)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cache { .. }));
        assert!(err.to_string().contains("Redis GET timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_prompt_command_passes_through() {
        let value = within("GET", Duration::from_secs(1), async {
            Ok::<_, redis::RedisError>(Some("schema".to_string()))
        })
        .await
        .unwrap();
        assert_eq!(value.as_deref(), Some("schema"));

        let err = within("DEL", Duration::from_secs(1), async {
            Err::<(), _>(redis::RedisError::from((redis::ErrorKind::IoError, "reset")))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::Cache { .. }));
    }
}
