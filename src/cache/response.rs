//! Bounded LRU + TTL response cache.
//!
//! Two independent bounds apply: an entry count with least-recently-used
//! eviction, and an absolute time-to-live measured from insertion. Reading
//! an entry refreshes its LRU recency but never extends its TTL.
//!
//! moka applies evictions in batched maintenance passes. Every insert runs
//! that maintenance before returning, so no more than `max_entries` entries
//! are ever readable once the insert completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::Serialize;

use super::Fingerprint;
use crate::telemetry;
use crate::types::CompletionResponse;

/// Configuration for the response cache.
///
/// ```rust
/// # use hugin::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 1,000.
    pub max_entries: u64,
    /// Time-to-live for cached entries. Default: 6 hours.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(6 * 3600),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub max_entries: u64,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
}

/// In-memory response cache keyed by [`Fingerprint`].
pub struct ResponseCache {
    cache: Cache<Fingerprint, CompletionResponse>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            cache,
            config: config.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached response. Emits hit/miss metrics.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<CompletionResponse> {
        match self.cache.get(fingerprint).await {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Insert (or overwrite) a response and evict down to `max_entries`.
    pub async fn insert(&self, fingerprint: Fingerprint, response: CompletionResponse) {
        self.cache.insert(fingerprint, response).await;
        self.cache.run_pending_tasks().await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Apply pending evictions and expirations.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Number of resident entries after pending maintenance.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.entry_count().await,
            max_entries: self.config.max_entries,
            ttl_secs: self.config.ttl.as_secs(),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: content.into(),
            provider_key: "local".into(),
            model: "m".into(),
            ..Default::default()
        }
    }

    #[test]
    fn default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1_000);
        assert_eq!(config.ttl, Duration::from_secs(21_600));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = ResponseCache::new(&CacheConfig::default());
        let key = Fingerprint(42);
        assert!(cache.get(&key).await.is_none());
        cache.insert(key, response("hello")).await;
        assert_eq!(cache.get(&key).await.unwrap().content, "hello");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn clear_empties_immediately() {
        let cache = ResponseCache::new(&CacheConfig::default());
        cache.insert(Fingerprint(1), response("a")).await;
        cache.insert(Fingerprint(2), response("b")).await;
        cache.clear().await;
        assert_eq!(cache.entry_count().await, 0);
        assert!(cache.get(&Fingerprint(1)).await.is_none());
    }
}
