//! Cache layer
//!
//! Key-value cache with per-key expiry used for replayed decision responses,
//! cached user risk and the bounded per-user recency lists. Values are plain
//! strings; recency lists hold transaction ids.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use crate::error::CacheResult;
use std::time::Duration;

/// Trait for cache backends
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Unconditional write with expiry
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Write only if the key is absent (SET NX). Returns `true` when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Move `member` to the head of the list at `key`, keep at most `limit`
    /// entries and refresh the expiry. Applied atomically.
    async fn push_recent(
        &self,
        key: &str,
        member: &str,
        limit: usize,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// List contents, most recent first. Empty when the key is absent.
    async fn recent(&self, key: &str) -> CacheResult<Vec<String>>;
}
