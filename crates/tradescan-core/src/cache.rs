//! In-memory TTL cache for upstream responses.
//!
//! Expiry is checked lazily: an expired entry is dropped on the read that finds it.
//! When the store is full, inserting a new key evicts the single oldest insertion
//! (insertion order, not access recency).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cache sizing and default expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1_000,
        }
    }
}

/// Counters reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub total_requests: u64,
    /// Percentage of lookups that hit, `0.0` before the first lookup.
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    /// Default TTL in seconds.
    pub ttl: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    evictions: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    // Iteration order is insertion order; index 0 is the eviction candidate.
    map: IndexMap<String, CacheEntry<V>>,
    config: CacheConfig,
    counters: Counters,
}

impl<V: Clone> CacheInner<V> {
    fn new(config: CacheConfig) -> Self {
        Self {
            map: IndexMap::new(),
            config,
            counters: Counters::default(),
        }
    }

    fn is_disabled(&self) -> bool {
        self.config.ttl.is_zero() || self.config.max_size == 0
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        match self.map.get(key) {
            Some(entry) if now < entry.expires_at => {
                self.counters.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                self.map.shift_remove(key);
                self.counters.misses += 1;
                None
            }
            None => {
                self.counters.misses += 1;
                None
            }
        }
    }

    fn set(&mut self, key: String, value: V, ttl_override: Option<Duration>) {
        if self.is_disabled() {
            return;
        }

        let expires_at = expiry(Instant::now(), ttl_override.unwrap_or(self.config.ttl));

        // An overwrite re-enters at the back of the insertion order.
        if self.map.shift_remove(&key).is_none()
            && self.map.len() >= self.config.max_size
            && self.map.shift_remove_index(0).is_some()
        {
            self.counters.evictions += 1;
        }

        self.map.insert(key, CacheEntry { value, expires_at });
        self.counters.sets += 1;
    }

    fn invalidate(&mut self, key: &str) -> bool {
        let removed = self.map.shift_remove(key).is_some();
        if removed {
            self.counters.deletes += 1;
        }
        removed
    }

    fn stats(&self) -> CacheStats {
        let Counters {
            hits,
            misses,
            sets,
            deletes,
            evictions,
        } = self.counters;
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64 * 100.0
        };

        CacheStats {
            hits,
            misses,
            sets,
            deletes,
            evictions,
            total_requests,
            hit_rate,
            size: self.map.len(),
            max_size: self.config.max_size,
            ttl: self.config.ttl.as_secs(),
        }
    }
}

// Roughly 30 years; a TTL past the clock's range is clamped here.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Thread-safe TTL cache shared by every upstream adapter.
///
/// Keys must encode the operation and all of its arguments
/// (`coingecko:markets:usd:250:1`) so that different calls never collide.
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    inner: Arc<Mutex<CacheInner<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        tracing::info!(
            ttl_secs = config.ttl.as_secs(),
            max_size = config.max_size,
            "cache initialized"
        );
        Self {
            inner: Arc::new(Mutex::new(CacheInner::new(config))),
        }
    }

    /// Cache that never stores anything.
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            ttl: Duration::ZERO,
            max_size: 0,
        })
    }

    /// Returns the value for `key` if it exists and has not expired.
    ///
    /// An expired entry is removed and the lookup is counted as a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let value = self.inner.lock().await.get(key);
        if value.is_some() {
            tracing::debug!(key, "cache hit");
        } else {
            tracing::debug!(key, "cache miss");
        }
        value
    }

    /// Insert or overwrite `key`. `ttl_override` replaces the default TTL.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl_override: Option<Duration>) {
        self.inner.lock().await.set(key.into(), value, ttl_override);
    }

    /// Return the cached value, or run `fetch` and cache its successful result.
    ///
    /// The lock is not held while `fetch` runs, so concurrent misses on the same key may
    /// each reach the upstream. Errors are returned as-is and never cached.
    pub async fn get_or_try_insert_with<E, F, Fut>(
        &self,
        key: &str,
        ttl_override: Option<Duration>,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = fetch().await?;
        self.set(key, value.clone(), ttl_override).await;
        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().await.invalidate(key)
    }

    pub async fn clear(&self) {
        self.inner.lock().await.map.clear();
        tracing::info!("cache cleared");
    }

    /// Number of stored entries, including expired ones not yet read.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
