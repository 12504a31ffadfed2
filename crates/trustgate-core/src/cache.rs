//! In-memory TTL caching for source payloads and validation results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Defines how a single request interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Read from the cache if a live entry is present;
    /// otherwise fetch and write the result to the cache. (Default)
    #[default]
    Use,
    /// Always fetch, bypassing any cached entry, and write the new result.
    Refresh,
    /// Always fetch and neither read from nor write to the cache.
    Bypass,
}

/// Which entry is evicted when a bounded cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStrategy {
    /// Evict the entry inserted first.
    #[default]
    Fifo,
    /// Evict the entry read least recently.
    Lru,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    max_entries: Option<usize>,
    strategy: EvictionStrategy,
}

impl<V: Clone> CacheInner<V> {
    fn new(default_ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            default_ttl,
            max_entries: None,
            strategy: EvictionStrategy::default(),
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = self.map.get(key)?.is_expired(now);
        if expired {
            self.map.remove(key);
            return None;
        }

        let entry = self.map.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn put(&mut self, key: String, value: V, ttl_override: Option<Duration>) {
        let ttl = ttl_override.unwrap_or(self.default_ttl);
        let now = Instant::now();

        if let Some(max) = self.max_entries {
            if !self.map.contains_key(&key) && self.map.len() >= max {
                self.clear_expired();
                if self.map.len() >= max {
                    self.evict_one();
                }
            }
        }

        self.map.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
                last_access: now,
            },
        );
    }

    fn evict_one(&mut self) {
        let victim = match self.strategy {
            EvictionStrategy::Fifo => self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone()),
            EvictionStrategy::Lru => self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone()),
        };
        if let Some(key) = victim {
            self.map.remove(&key);
        }
    }

    fn clear_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, entry| !entry.is_expired(now));
        before - self.map.len()
    }
}

/// Thread-safe TTL cache keyed by string fingerprints.
///
/// An entry is never returned once `now - inserted_at >= ttl`. Expired
/// entries are evicted lazily on read and by [`clear_expired`](Self::clear_expired).
#[derive(Debug)]
pub struct CacheStore<V> {
    inner: Arc<tokio::sync::RwLock<CacheInner<V>>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync> CacheStore<V> {
    /// Create a new cache store with a default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner::new(default_ttl))),
        }
    }

    /// Create a bounded cache that evicts with `strategy` once `max_entries` is reached.
    pub fn bounded(default_ttl: Duration, max_entries: usize, strategy: EvictionStrategy) -> Self {
        let mut inner = CacheInner::new(default_ttl);
        inner.max_entries = Some(max_entries.max(1));
        inner.strategy = strategy;
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(inner)),
        }
    }

    /// Create a disabled cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Get a cached value if it exists and hasn't expired. Expired entries are removed.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut store = self.inner.write().await;
        store.get(key)
    }

    /// Put a value into the cache with the given key.
    ///
    /// If `ttl_override` is provided, it will be used instead of the default TTL.
    /// If the cache is disabled (TTL is ZERO), this is a no-op.
    pub async fn put(&self, key: String, value: V, ttl_override: Option<Duration>) {
        let mut store = self.inner.write().await;

        if store.default_ttl == Duration::ZERO {
            return;
        }

        store.put(key, value, ttl_override);
    }

    pub async fn remove(&self, key: &str) -> Option<V> {
        let mut store = self.inner.write().await;
        store.map.remove(key).map(|entry| entry.value)
    }

    /// Remove expired entries, returning how many were dropped.
    pub async fn clear_expired(&self) -> usize {
        let mut store = self.inner.write().await;
        store.clear_expired()
    }

    /// Clear all entries from the cache.
    pub async fn clear(&self) {
        let mut store = self.inner.write().await;
        store.map.clear();
    }

    /// Get the number of entries in the cache (including expired entries).
    pub async fn len(&self) -> usize {
        let store = self.inner.read().await;
        store.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check if the cache is disabled (TTL is ZERO).
    pub async fn is_disabled(&self) -> bool {
        let store = self.inner.read().await;
        store.default_ttl == Duration::ZERO
    }
}
