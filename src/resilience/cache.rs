//! Response Cache
//!
//! Short-TTL memoization of idempotent upstream reads.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::core::HttpMethod;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when a request does not override it.
    pub default_ttl: Duration,
    /// Size bound that triggers eviction on write.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 1000,
        }
    }
}

/// Longest TTL an entry can be stored with.
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Derive the cache key for a request.
///
/// Deterministic over method, endpoint and body: SHA-256, hex encoded.
pub fn cache_key(method: HttpMethod, endpoint: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// TTL cache with lazy expiry and oldest-expiring-first eviction.
///
/// Reads take a shared lock; only expiry removal and writes take the
/// exclusive lock.
pub struct ResponseCache<V> {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create new cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up an unexpired entry; an expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key, "cache hit");
                    return Some(entry.value.clone());
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(key)
            .map(|entry| entry.expires_at <= now)
            .unwrap_or(false)
        {
            entries.remove(key);
            trace!(key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert with the default TTL.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.config.default_ttl);
    }

    /// Insert with an explicit TTL, clamped to [`MAX_ENTRY_TTL`].
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl.min(MAX_ENTRY_TTL))
            .unwrap_or(now);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.into(), CacheEntry { value, expires_at });

        if entries.len() > self.config.max_entries {
            let evicted = self.evict(&mut entries, now);
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    fn evict(&self, entries: &mut HashMap<String, CacheEntry<V>>, now: Instant) -> u64 {
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);

        let overflow = entries.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            let mut by_expiry: Vec<(Instant, String)> = entries
                .iter()
                .map(|(key, entry)| (entry.expires_at, key.clone()))
                .collect();
            by_expiry.sort();
            for (_, key) in by_expiry.into_iter().take(overflow) {
                entries.remove(&key);
            }
        }

        (before - entries.len()) as u64
    }

    /// Remove one entry.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub fn get_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
