//! Entity cache module - in-memory front for cached entity snapshots
//!
//! Sits in front of the SQLite `entity_cache` table so repeated offline reads
//! of the same episode or transcript do not hit the database:
//! - LRU eviction (least recently used)
//! - TTL (time-to-live) expiration
//! - Thread-safe async operations
//! - Hit/miss counters for storage stats

use crate::sync::models::{CacheRecord, EntityType};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Entity cache configuration
pub struct EntityCacheConfig {
    /// Maximum number of snapshots to keep in memory
    pub max_capacity: u64,

    /// Time-to-live for cached snapshots (in seconds)
    pub ttl_secs: u64,

    /// Time-to-idle for cached snapshots (in seconds)
    pub tti_secs: u64,
}

impl Default for EntityCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 256,
            ttl_secs: 1800,
            tti_secs: 600,
        }
    }
}

type CacheKey = (EntityType, String);

/// Memory cache for recently read entity snapshots
#[derive(Clone)]
pub struct EntityCache {
    cache: Arc<Cache<CacheKey, CacheRecord>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EntityCache {
    /// Create a new entity cache with default configuration
    pub fn new() -> Self {
        Self::with_config(EntityCacheConfig::default())
    }

    /// Create a new entity cache with custom configuration
    pub fn with_config(config: EntityCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .time_to_idle(Duration::from_secs(config.tti_secs))
            .build();

        Self {
            cache: Arc::new(cache),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a snapshot from cache
    pub async fn get(&self, entity_type: EntityType, key: &str) -> Option<CacheRecord> {
        match self.cache.get(&(entity_type, key.to_string())).await {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(record)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a snapshot into cache
    pub async fn insert(&self, record: CacheRecord) {
        let key = (record.entity_type, record.key.clone());
        self.cache.insert(key, record).await;
    }

    /// Drop one snapshot
    pub async fn remove(&self, entity_type: EntityType, key: &str) {
        self.cache.invalidate(&(entity_type, key.to_string())).await;
    }

    /// Drop every cached snapshot
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        // Wait for invalidation to complete
        self.cache.run_pending_tasks().await;
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            (hits as f64 / total_requests as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            total_requests,
            hit_rate,
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Total cache requests
    pub total_requests: u64,

    /// Cache hit rate (percentage)
    pub hit_rate: f64,

    /// Number of entries in cache
    pub entry_count: u64,
}
