//! SQLite-backed `LocalStore`
//!
//! Features:
//! - Cached entity snapshots keyed by `(entity_type, natural_key)`
//! - Persistent, insertion-ordered mutation queue
//! - One statement or one transaction per queue operation
//! - In-memory snapshot cache (moka) in front of the `entity_cache` table

use super::{CleanupReport, LocalStore, StorageStats, StoreError};
use crate::cache::EntityCache;
use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::sync::models::{CacheRecord, Entity, EntityType, Operation, SyncQueueItem};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;

const QUEUE_COLUMNS: &str =
    "id, entity_type, operation, payload, attempts, max_attempts, created_at";

/// Raw queue row, decoded outside the rusqlite closure
struct QueueRow {
    id: String,
    entity_type: String,
    operation: String,
    payload: String,
    attempts: i64,
    max_attempts: i64,
    created_at: String,
}

impl QueueRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            operation: row.get(2)?,
            payload: row.get(3)?,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_item(self) -> Result<SyncQueueItem, StoreError> {
        let entity_type = EntityType::parse(&self.entity_type).ok_or_else(|| {
            StoreError::Corrupt(format!("queue item {}: unknown entity type {}", self.id, self.entity_type))
        })?;
        let operation = Operation::parse(&self.operation).ok_or_else(|| {
            StoreError::Corrupt(format!("queue item {}: unknown operation {}", self.id, self.operation))
        })?;
        let payload: Entity = serde_json::from_str(&self.payload)?;

        Ok(SyncQueueItem {
            id: self.id,
            entity_type,
            operation,
            payload,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Decode a cache row
fn cache_record(entity_type: EntityType, key: String, payload: &str, cached_at: &str) -> Result<CacheRecord, StoreError> {
    Ok(CacheRecord {
        entity_type,
        key,
        entity: serde_json::from_str(payload)?,
        cached_at: parse_timestamp(cached_at)?,
    })
}

/// Offline store on top of the SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    memory: EntityCache,
}

impl SqliteStore {
    /// Create new store over an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_cache(db, EntityCache::new())
    }

    pub fn with_cache(db: Arc<Database>, memory: EntityCache) -> Self {
        Self { db, memory }
    }

    /// Store over a fresh in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn init(&self) -> Result<(), StoreError> {
        let _: i64 = self.db.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    async fn save(&self, entity: &Entity) -> Result<(), StoreError> {
        let record = CacheRecord {
            entity_type: entity.entity_type(),
            key: entity.natural_key(),
            entity: entity.clone(),
            cached_at: Utc::now(),
        };
        let payload = serde_json::to_string(entity)?;

        self.db.execute(
            r#"
            INSERT INTO entity_cache (entity_type, natural_key, payload, cached_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(entity_type, natural_key)
            DO UPDATE SET payload = excluded.payload, cached_at = excluded.cached_at
            "#,
            params![
                record.entity_type.as_str(),
                record.key,
                payload,
                format_timestamp(&record.cached_at),
            ],
        )?;

        log::debug!("Cached {} {}", record.entity_type, record.key);
        self.memory.insert(record).await;
        Ok(())
    }

    async fn remove(&self, entity_type: EntityType, key: &str) -> Result<(), StoreError> {
        let removed = self.db.execute(
            "DELETE FROM entity_cache WHERE entity_type = ?1 AND natural_key = ?2",
            params![entity_type.as_str(), key],
        )?;
        self.memory.remove(entity_type, key).await;

        if removed > 0 {
            log::debug!("Removed cached {} {}", entity_type, key);
        }
        Ok(())
    }

    async fn get(&self, entity_type: EntityType, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        if let Some(record) = self.memory.get(entity_type, key).await {
            return Ok(Some(record));
        }

        let row: Option<(String, String)> = self
            .db
            .query_row(
                "SELECT payload, cached_at FROM entity_cache WHERE entity_type = ?1 AND natural_key = ?2",
                params![entity_type.as_str(), key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                crate::db::DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                other => Err(other),
            })?;

        match row {
            Some((payload, cached_at)) => {
                let record = cache_record(entity_type, key.to_string(), &payload, &cached_at)?;
                self.memory.insert(record.clone()).await;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>, StoreError> {
        let rows: Vec<(String, String, String)> = self.db.query(
            r#"
            SELECT natural_key, payload, cached_at
            FROM entity_cache
            WHERE entity_type = ?1
            ORDER BY natural_key ASC
            "#,
            params![entity_type.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        rows.into_iter()
            .map(|(key, payload, cached_at)| cache_record(entity_type, key, &payload, &cached_at))
            .collect()
    }

    async fn add_to_sync_queue(&self, item: &SyncQueueItem) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&item.payload)?;
        let created_at = format_timestamp(&item.created_at);

        self.db.execute(
            r#"
            INSERT INTO sync_queue (
                id, entity_type, operation, payload, attempts, max_attempts,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                item.id,
                item.entity_type.as_str(),
                item.operation.as_str(),
                payload,
                item.attempts,
                item.max_attempts,
                created_at,
            ],
        )?;

        Ok(())
    }

    async fn get_sync_queue(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        let rows = self.db.query(
            &format!("SELECT {} FROM sync_queue ORDER BY seq ASC", QUEUE_COLUMNS),
            [],
            QueueRow::from_row,
        )?;

        let mut items = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for row in rows {
            let id = row.id.clone();
            match row.into_item() {
                Ok(item) => items.push(item),
                Err(e) => {
                    log::error!("Dropping undecodable queue item {}: {}", id, e);
                    corrupt.push(id);
                }
            }
        }

        if !corrupt.is_empty() {
            self.db.with_transaction(|tx| {
                for id in &corrupt {
                    tx.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
                }
                Ok(())
            })?;
        }

        Ok(items)
    }

    async fn remove_sync_item(&self, id: &str) -> Result<(), StoreError> {
        self.db.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn increment_sync_attempts(&self, id: &str) -> Result<Option<SyncQueueItem>, StoreError> {
        let now = format_timestamp(&Utc::now());
        let select = format!("SELECT {} FROM sync_queue WHERE id = ?1", QUEUE_COLUMNS);

        let row = self.db.with_transaction(|tx| {
            tx.execute(
                r#"
                UPDATE sync_queue
                SET attempts = MIN(attempts + 1, max_attempts), updated_at = ?1
                WHERE id = ?2
                "#,
                params![now, id],
            )?;

            tx.query_row(&select, params![id], QueueRow::from_row).optional()
        })?;

        row.map(QueueRow::into_item).transpose()
    }

    async fn clear_expired_data(&self, max_age: Duration) -> Result<CleanupReport, StoreError> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        // Anything older than the representable past cannot exist
        let Some(cutoff) = cutoff else {
            return Ok(CleanupReport::default());
        };
        let cutoff = format_timestamp(&cutoff);

        let report = self.db.with_transaction(|tx| {
            let cache_entries_removed = tx.execute(
                "DELETE FROM entity_cache WHERE cached_at < ?1",
                params![cutoff],
            )?;
            let queue_items_removed = tx.execute(
                "DELETE FROM sync_queue WHERE created_at < ?1",
                params![cutoff],
            )?;
            Ok(CleanupReport {
                cache_entries_removed,
                queue_items_removed,
            })
        })?;

        if report.cache_entries_removed > 0 {
            self.memory.clear().await;
        }

        Ok(report)
    }

    async fn storage_usage(&self) -> Result<StorageStats, StoreError> {
        let counts: Vec<(String, i64)> = self.db.query(
            "SELECT entity_type, COUNT(*) FROM entity_cache GROUP BY entity_type",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stats = StorageStats::default();
        for (entity_type, count) in counts {
            let count = count.max(0) as u64;
            match EntityType::parse(&entity_type) {
                Some(EntityType::Episode) => stats.episodes = count,
                Some(EntityType::Transcript) => stats.transcripts = count,
                Some(EntityType::Timecodes) => stats.timecodes = count,
                None => log::warn!("Unknown entity type in cache: {}", entity_type),
            }
        }

        let (pending, oldest): (i64, Option<String>) = self.db.query_row(
            "SELECT COUNT(*), MIN(created_at) FROM sync_queue",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        stats.pending_mutations = pending.max(0) as u64;
        stats.oldest_pending_at = oldest.as_deref().map(parse_timestamp).transpose()?;

        stats.database_bytes = self.db.size_bytes()?;
        stats.memory_cache = Some(self.memory.stats().await);

        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================
