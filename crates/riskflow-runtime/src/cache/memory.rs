//! In-memory cache backend
//!
//! Expiry uses `tokio::time::Instant`, so tests can pause and advance time.
//! Expired entries are hidden on read and purged by [`MemoryCache::cleanup`],
//! which writes also run at most once per [`SWEEP_INTERVAL`].

use super::Cache;
use crate::error::{CacheError, CacheResult};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Minimum time between expiry sweeps triggered by writes
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

struct State {
    entries: HashMap<String, Entry>,
    last_sweep: Instant,
}

impl State {
    /// Drop expired entries, returning how many were removed
    fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        self.last_sweep = Instant::now();
        before - self.entries.len()
    }

    fn maybe_purge(&mut self) {
        if self.last_sweep.elapsed() >= SWEEP_INTERVAL {
            self.purge();
        }
    }
}

/// In-memory cache
pub struct MemoryCache {
    state: RwLock<State>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            state: RwLock::new(State {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|e| !e.is_expired())
            .count()
    }

    /// Remove expired entries
    pub async fn cleanup(&self) -> usize {
        self.state.write().await.purge()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remaining time to live for a key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let state = self.state.read().await;
        let entry = state.entries.get(key).filter(|e| !e.is_expired())?;
        Some(entry.expires_at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let state = self.state.read().await;
        match state.entries.get(key).filter(|e| !e.is_expired()) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut state = self.state.write().await;
        state.maybe_purge();
        state
            .entries
            .insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        let mut state = self.state.write().await;
        state.maybe_purge();
        if state.entries.get(key).is_some_and(|e| !e.is_expired()) {
            return Ok(false);
        }
        state.entries.insert(key.to_string(), Entry::new(Value::Text(value.to_string()), ttl));
        Ok(true)
    }

    async fn push_recent(
        &self,
        key: &str,
        member: &str,
        limit: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut state = self.state.write().await;
        state.maybe_purge();
        let entries = &mut state.entries;

        let mut list = match entries.remove(key) {
            Some(entry) if entry.is_expired() => VecDeque::new(),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list,
            Some(entry) => {
                entries.insert(key.to_string(), entry);
                return Err(CacheError::WrongType(key.to_string()));
            }
            None => VecDeque::new(),
        };

        list.retain(|m| m != member);
        list.push_front(member.to_string());
        list.truncate(limit);

        entries.insert(key.to_string(), Entry::new(Value::List(list), ttl));
        Ok(())
    }

    async fn recent(&self, key: &str) -> CacheResult<Vec<String>> {
        let state = self.state.read().await;
        match state.entries.get(key).filter(|e| !e.is_expired()) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }
}
