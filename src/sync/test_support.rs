//! Test doubles for the engine's collaborators

use super::models::{CacheRecord, Entity, EntityData, EntityType, LoadRequest, Operation, SyncQueueItem};
use super::network::ReachabilityProbe;
use super::remote::{RemoteDataService, RemoteError};
use crate::db::format_timestamp;
use crate::store::{CleanupReport, LocalStore, SqliteStore, StorageStats, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

// ============================================================================
// Probe
// ============================================================================

/// Probe whose answer is set by the test
pub struct ScriptedProbe {
    reachable: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityProbe for ScriptedProbe {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Transient("Failed to fetch".into()))
        }
    }
}

// ============================================================================
// Remote
// ============================================================================

/// Remote whose results are scripted per call
///
/// Scripted results are consumed first; once a script runs dry the
/// default applies (writes succeed, fetches fail with `NotFound`).
#[derive(Default)]
pub struct ScriptedRemote {
    fetch_script: StdMutex<VecDeque<Result<EntityData, RemoteError>>>,
    write_script: StdMutex<VecDeque<Result<(), RemoteError>>>,
    fetch_failure: StdMutex<Option<RemoteError>>,
    write_failure: StdMutex<Option<RemoteError>>,
    write_delay: StdMutex<Option<Duration>>,
    writes: StdMutex<Vec<(Entity, Operation)>>,
    fetch_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, result: Result<EntityData, RemoteError>) {
        self.fetch_script.lock().unwrap().push_back(result);
    }

    pub fn push_write(&self, result: Result<(), RemoteError>) {
        self.write_script.lock().unwrap().push_back(result);
    }

    /// Fail every unscripted fetch with `err`
    pub fn fail_fetches(&self, err: Option<RemoteError>) {
        *self.fetch_failure.lock().unwrap() = err;
    }

    /// Fail every unscripted write with `err`
    pub fn fail_writes(&self, err: Option<RemoteError>) {
        *self.write_failure.lock().unwrap() = err;
    }

    /// Make each write take `delay` (tokio time)
    pub fn delay_writes(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Writes that were accepted, in order
    pub fn accepted_writes(&self) -> Vec<(Entity, Operation)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteDataService for ScriptedRemote {
    async fn fetch(&self, request: &LoadRequest) -> Result<EntityData, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(result) = self.fetch_script.lock().unwrap().pop_front() {
            return result;
        }
        if let Some(err) = self.fetch_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Err(RemoteError::NotFound(request.to_string()))
    }

    async fn write(&self, entity: &Entity, operation: Operation) -> Result<(), RemoteError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.write_script.lock().unwrap().pop_front();
        let result = match scripted {
            Some(result) => result,
            None => match self.write_failure.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        };

        if result.is_ok() {
            self.writes.lock().unwrap().push((entity.clone(), operation));
        }
        result
    }
}

// ============================================================================
// Store
// ============================================================================

/// `SqliteStore` wrapper with switchable failures
pub struct FlakyStore {
    inner: SqliteStore,
    fail_saves: AtomicBool,
    fail_reads: AtomicBool,
    fail_queue: AtomicBool,
    fail_queue_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().expect("in-memory store"),
            fail_saves: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_queue: AtomicBool::new(false),
            fail_queue_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queue(&self, fail: bool) {
        self.fail_queue.store(fail, Ordering::SeqCst);
    }

    /// Make `get_sync_queue` fail
    pub fn fail_queue_reads(&self, fail: bool) {
        self.fail_queue_reads.store(fail, Ordering::SeqCst);
    }

    /// Write a queue row directly, bypassing encoding
    pub fn insert_raw_queue_row(&self, id: &str, entity_type: &str, operation: &str, payload: &str) {
        let now = format_timestamp(&Utc::now());
        self.inner
            .database()
            .execute(
                r#"
                INSERT INTO sync_queue (id, entity_type, operation, payload, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![id, entity_type, operation, payload, now],
            )
            .expect("raw queue insert");
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{} disabled by test", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.inner.init().await
    }

    async fn save(&self, entity: &Entity) -> Result<(), StoreError> {
        Self::check(&self.fail_saves, "save")?;
        self.inner.save(entity).await
    }

    async fn remove(&self, entity_type: EntityType, key: &str) -> Result<(), StoreError> {
        Self::check(&self.fail_saves, "remove")?;
        self.inner.remove(entity_type, key).await
    }

    async fn get(&self, entity_type: EntityType, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        Self::check(&self.fail_reads, "get")?;
        self.inner.get(entity_type, key).await
    }

    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<CacheRecord>, StoreError> {
        Self::check(&self.fail_reads, "get_all")?;
        self.inner.get_all(entity_type).await
    }

    async fn add_to_sync_queue(&self, item: &SyncQueueItem) -> Result<(), StoreError> {
        Self::check(&self.fail_queue, "add_to_sync_queue")?;
        self.inner.add_to_sync_queue(item).await
    }

    async fn get_sync_queue(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        Self::check(&self.fail_queue_reads, "get_sync_queue")?;
        self.inner.get_sync_queue().await
    }

    async fn remove_sync_item(&self, id: &str) -> Result<(), StoreError> {
        self.inner.remove_sync_item(id).await
    }

    async fn increment_sync_attempts(&self, id: &str) -> Result<Option<SyncQueueItem>, StoreError> {
        self.inner.increment_sync_attempts(id).await
    }

    async fn clear_expired_data(&self, max_age: Duration) -> Result<CleanupReport, StoreError> {
        self.inner.clear_expired_data(max_age).await
    }

    async fn storage_usage(&self) -> Result<StorageStats, StoreError> {
        self.inner.storage_usage().await
    }
}
