//! Redis cache backend

use super::Cache;
use crate::error::{CacheError, CacheResult};
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Cache backed by Redis through a reconnecting connection manager
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`)
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url).map_err(cache_error)?;
        let conn = ConnectionManager::new(client).await.map_err(cache_error)?;
        Ok(Self { conn })
    }
}

fn cache_error(err: redis::RedisError) -> CacheError {
    if err.code() == Some("WRONGTYPE") {
        return CacheError::WrongType(err.to_string());
    }
    CacheError::Backend(err.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        // Replies "OK" when written and nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(reply.is_some())
    }

    async fn push_recent(
        &self,
        key: &str,
        member: &str,
        limit: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let stop = limit.saturating_sub(1) as i64;

        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(member)
            .ignore()
            .cmd("LPUSH")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(stop)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn recent(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(cache_error)
    }
}
