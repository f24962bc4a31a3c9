//! Local Store - durable per-entity storage plus the mutation queue table
//!
//! The engine only ever talks to storage through the `LocalStore` trait, so a
//! host can swap the SQLite implementation for another engine.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::cache::CacheStats;
use crate::db::DbError;
use crate::sync::models::{CacheRecord, Entity, EntityType, SyncQueueItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage consumed by the sync engine
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Prepare the store for use; must be idempotent
    async fn init(&self) -> Result<(), StoreError>;

    /// Write (or overwrite) the cached snapshot of an entity
    async fn save(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Drop the cached snapshot of an entity; unknown keys are ignored
    async fn remove(&self, entity_type: EntityType, key: &str) -> Result<(), StoreError>;

    /// Read one cached snapshot
    async fn get(&self, entity_type: EntityType, key: &str) -> Result<Option<CacheRecord>, StoreError>;

    /// Read every cached snapshot of one type
    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>, StoreError>;

    /// Append a pending mutation
    async fn add_to_sync_queue(&self, item: &SyncQueueItem) -> Result<(), StoreError>;

    /// All pending mutations in insertion order
    ///
    /// Rows that cannot be decoded are dropped from the queue and skipped.
    async fn get_sync_queue(&self) -> Result<Vec<SyncQueueItem>, StoreError>;

    /// Delete a pending mutation; unknown ids are ignored
    async fn remove_sync_item(&self, id: &str) -> Result<(), StoreError>;

    /// Bump the attempt counter, never past `max_attempts`
    ///
    /// Returns the updated item, or `None` if the id is unknown.
    async fn increment_sync_attempts(&self, id: &str) -> Result<Option<SyncQueueItem>, StoreError>;

    /// Prune cache records and queue items older than `max_age`
    async fn clear_expired_data(&self, max_age: Duration) -> Result<CleanupReport, StoreError>;

    /// Usage figures for `get_storage_stats`
    async fn storage_usage(&self) -> Result<StorageStats, StoreError>;
}

// ============================================================================
// Reports
// ============================================================================

/// What `clear_expired_data` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cache_entries_removed: usize,
    pub queue_items_removed: usize,
}

/// Storage usage snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub episodes: u64,
    pub transcripts: u64,
    pub timecodes: u64,
    pub pending_mutations: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub database_bytes: u64,
    pub memory_cache: Option<CacheStats>,
}

impl StorageStats {
    /// Number of cached snapshots across all entity types
    pub fn cached_entities(&self) -> u64 {
        self.episodes + self.transcripts + self.timecodes
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Database(DbError::Sqlite(value))
    }
}
