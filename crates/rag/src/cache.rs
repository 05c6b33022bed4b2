//! Caching primitives
//!
//! All three caches in the system (embedding, query-result, response)
//! share one shape: a bounded TTL cache with hit counting. Each cache
//! is owned and mutated by exactly one component.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// A single cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in [0, 1]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// Bounded TTL cache
///
/// When full, the oldest entry is evicted. Expired entries are dropped
/// lazily on lookup and eagerly on insert.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
    default_ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.hit_count += 1;
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        inner.stats.misses += 1;
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut inner = self.inner.lock();

        inner.entries.retain(|_, e| !e.is_expired());

        if inner.entries.len() >= self.max_entries {
            // Evict the oldest entry to stay within bounds
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(
            key.into(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
                hit_count: 0,
            },
        );
        inner.stats.insertions += 1;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

/// Single-flight coalescing of identical in-flight computations
///
/// Concurrent callers for the same key share one computation; the rest
/// await its value. Errors are not retained: the failing caller gets its
/// error and the next waiter attempts the computation itself. If the
/// initiating caller is cancelled mid-flight, the next waiter restarts
/// the computation, so every still-interested caller receives a result.
pub struct SingleFlight<V> {
    inflight: DashMap<String, Arc<OnceCell<V>>>,
}

impl<V: Clone> SingleFlight<V> {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    pub async fn run<E, F, Fut>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell.get_or_try_init(compute).await.cloned();
        self.inflight.remove(key);
        result
    }
}

impl<V: Clone> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}
