//! Sync Engine - orchestrates local persistence, remote delivery and the queue
//!
//! Public surface:
//! - `save_data` / `load_data`: optimistic writes, cache-backed reads
//! - `sync_offline_changes` / `force_sync`: single-flight queue drain
//! - `cleanup_old_data`, `get_storage_stats`, `get_network_status`
//! - `on_network_change` / `on_sync_change` listener registration
//! - `start` / `stop`: probe loop plus periodic drain (first run shortly after start)
//!
//! Conflict policy is last-write-wins at the remote store.

use super::events::{Listeners, Subscription, SyncEvent};
use super::models::{
    DataSource, Entity, EntityData, EntityType, LoadOutcome, LoadRequest, Operation, SaveOutcome,
    SyncSummary,
};
use super::network::{NetworkMonitor, NetworkState};
use super::queue::SyncQueue;
use super::remote::RemoteDataService;
use super::retry::RetryableRemoteClient;
use super::scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerError};
use crate::config::SyncConfig;
use crate::store::{CleanupReport, LocalStore, StorageStats, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;

// ============================================================================
// Errors & Reports
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncEngineError {
    #[error("Local persistence failed: {0}")]
    LocalPersistence(#[from] StoreError),

    #[error("Cannot sync invalid data: {0}")]
    InvalidEntity(String),

    #[error("No {0} data available offline")]
    NotAvailableOffline(String),

    #[error("Cannot sync while offline")]
    Offline,

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Snapshot returned by `get_network_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatusReport {
    pub is_online: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_transition: DateTime<Utc>,
    pub connection_type: String,
}

// ============================================================================
// Engine
// ============================================================================

struct EngineInner {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteDataService>,
    monitor: NetworkMonitor,
    queue: SyncQueue,
    retry: RetryableRemoteClient,
    config: SyncConfig,
    initialized: OnceCell<()>,
    sync_in_progress: AtomicBool,
    sync_listeners: Listeners<SyncEvent>,
    drain_scheduler: BackgroundScheduler,
}

/// Offline-first sync engine
///
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Clears the in-progress flag when a drain ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Create an engine over injected collaborators
    ///
    /// The monitor's reconnect handler is taken over: a confirmed return to
    /// ONLINE starts a drain.
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteDataService>,
        monitor: NetworkMonitor,
        config: SyncConfig,
    ) -> Self {
        let drain_config = SchedulerConfig::new("Sync drain", config.drain_interval)
            .with_initial_delay(config.startup_drain_delay);

        let inner = Arc::new(EngineInner {
            queue: SyncQueue::with_max_attempts(store.clone(), config.max_attempts),
            retry: RetryableRemoteClient::new(config.retry),
            store,
            remote,
            monitor,
            config,
            initialized: OnceCell::new(),
            sync_in_progress: AtomicBool::new(false),
            sync_listeners: Listeners::new(),
            drain_scheduler: BackgroundScheduler::new(drain_config),
        });

        let weak = Arc::downgrade(&inner);
        inner.monitor.set_reconnect_handler(move || spawn_drain(&weak, "reconnect"));

        Self { inner }
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.inner.monitor
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.inner.queue
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_in_progress.load(Ordering::SeqCst)
    }

    async fn ensure_init(&self) -> Result<(), SyncEngineError> {
        let store = &self.inner.store;
        self.inner
            .initialized
            .get_or_try_init(|| async { store.init().await })
            .await
            .map_err(|e| {
                log::error!("Failed to initialize offline store: {}", e);
                SyncEngineError::LocalPersistence(e)
            })?;
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persist locally, then deliver now (online) or queue (offline)
    ///
    /// A delete drops the local snapshot, so later loads no longer see it.
    ///
    /// Remote and queue problems never fail the call once the local write
    /// succeeded.
    pub async fn save_data(&self, entity: Entity, operation: Operation) -> Result<SaveOutcome, SyncEngineError> {
        self.ensure_init().await?;

        let entity_type = entity.entity_type();
        let key = entity.natural_key();

        if let Err(e) = self.write_local(&entity, operation).await {
            log::error!("Failed to save {} {} ({}) locally: {}", entity_type, key, operation, e);

            if let Err(reason) = entity.check_queueable() {
                log::error!("Cannot add invalid {} {} to sync queue: {}", entity_type, key, reason);
                return Err(SyncEngineError::InvalidEntity(reason));
            }

            match self.inner.queue.enqueue(entity, operation).await {
                Ok(id) => log::info!("{} {} added to sync queue ({}) after local save failure", entity_type, key, id),
                Err(qe) => log::error!("Failed to add {} {} to sync queue: {}", entity_type, key, qe),
            }
            return Err(SyncEngineError::LocalPersistence(e));
        }

        if !self.inner.monitor.is_online() {
            self.enqueue_logged(entity, operation).await;
            return Ok(SaveOutcome {
                success: true,
                offline: true,
            });
        }

        let label = format!("{} {} {}", operation, entity_type, key);
        let remote = &self.inner.remote;
        let delivered = self
            .inner
            .retry
            .execute(&label, || remote.write(&entity, operation))
            .await;

        if let Err(e) = delivered {
            log::warn!("Immediate sync of {} failed, adding to queue: {}", label, e);
            self.enqueue_logged(entity, operation).await;
        }

        Ok(SaveOutcome {
            success: true,
            offline: false,
        })
    }

    /// Apply a mutation to the local snapshot; deletes drop it
    async fn write_local(&self, entity: &Entity, operation: Operation) -> Result<(), StoreError> {
        match operation {
            Operation::Delete => self.inner.store.remove(entity.entity_type(), &entity.natural_key()).await,
            Operation::Create | Operation::Update => self.inner.store.save(entity).await,
        }
    }

    async fn enqueue_logged(&self, entity: Entity, operation: Operation) {
        let entity_type = entity.entity_type();
        let key = entity.natural_key();
        if let Err(e) = self.inner.queue.enqueue(entity, operation).await {
            log::error!("Failed to queue {} {} {}: {}", operation, entity_type, key, e);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Load from the remote when online, otherwise (or on failure) from cache
    pub async fn load_data(&self, request: LoadRequest) -> Result<LoadOutcome, SyncEngineError> {
        self.ensure_init().await?;

        if self.inner.monitor.is_online() {
            let label = format!("load {}", request);
            let remote = &self.inner.remote;
            match self.inner.retry.execute(&label, || remote.fetch(&request)).await {
                Ok(data) => {
                    for entity in data.cache_entities() {
                        if let Err(e) = self.inner.store.save(&entity).await {
                            log::warn!("Failed to cache {} {}: {}", entity.entity_type(), entity.natural_key(), e);
                        }
                    }
                    return Ok(LoadOutcome {
                        data,
                        source: DataSource::Server,
                    });
                }
                Err(e) => log::warn!("Server load of {} failed, trying cache: {}", request, e),
            }
        }

        match self.load_cached(&request).await {
            Ok(Some(data)) => Ok(LoadOutcome {
                data,
                source: DataSource::Cache,
            }),
            Ok(None) => {
                log::error!("No cached {} available", request);
                Err(SyncEngineError::NotAvailableOffline(request.label().to_string()))
            }
            Err(e) => {
                log::warn!("Cache load failed for {}: {}", request, e);
                Err(SyncEngineError::NotAvailableOffline(request.label().to_string()))
            }
        }
    }

    async fn load_cached(&self, request: &LoadRequest) -> Result<Option<EntityData>, StoreError> {
        match request.cache_key() {
            Some(key) => Ok(self
                .inner
                .store
                .get(request.entity_type(), &key)
                .await?
                .map(|record| EntityData::from(record.entity))),
            None => {
                let mut episodes: Vec<_> = self
                    .inner
                    .store
                    .get_all(EntityType::Episode)
                    .await?
                    .into_iter()
                    .filter_map(|record| match record.entity {
                        Entity::Episode(episode) => Some(episode),
                        _ => None,
                    })
                    .collect();

                if episodes.is_empty() {
                    return Ok(None);
                }
                // Newest first, matching the remote listing
                episodes.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.slug.cmp(&a.slug)));
                Ok(Some(EntityData::Episodes(episodes)))
            }
        }
    }

    // =========================================================================
    // Queue Drain
    // =========================================================================

    /// Deliver every queued mutation, oldest first
    ///
    /// Returns `None` without doing anything when offline or when another
    /// drain is already running.
    pub async fn sync_offline_changes(&self) -> Result<Option<SyncSummary>, SyncEngineError> {
        if !self.inner.monitor.is_online() {
            log::debug!("Skipping queue drain: offline");
            return Ok(None);
        }

        if self
            .inner
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Skipping queue drain: already in progress");
            return Ok(None);
        }
        let _guard = DrainGuard(&self.inner.sync_in_progress);

        self.emit(SyncEvent::Start);

        let items = match self.drain_items().await {
            Ok(items) => items,
            Err(e) => {
                log::error!("Sync process failed: {}", e);
                self.emit(SyncEvent::Error { error: e.to_string() });
                self.emit(SyncEvent::Complete(SyncSummary::default()));
                return Err(e);
            }
        };

        log::info!("Processing {} offline changes", items.len());
        let mut summary = SyncSummary {
            total_count: items.len(),
            ..Default::default()
        };

        for item in items {
            let label = format!("{} {} {}", item.operation, item.entity_type, item.payload.natural_key());
            let remote = &self.inner.remote;
            let result = self
                .inner
                .retry
                .execute(&label, || remote.write(&item.payload, item.operation))
                .await;

            match result {
                Ok(()) => {
                    if let Err(e) = self.inner.queue.remove(&item.id).await {
                        log::error!("Delivered {} but failed to remove queue item {}: {}", label, item.id, e);
                    }
                    summary.success_count += 1;
                    self.emit(SyncEvent::ItemSuccess {
                        entity_type: item.entity_type,
                        operation: item.operation,
                    });
                }
                Err(e) => {
                    log::error!("Failed to sync {}: {}", label, e);

                    match self.inner.queue.increment_attempts(&item.id).await {
                        Ok(Some(updated)) if updated.is_exhausted() => {
                            log::warn!(
                                "Max attempts ({}) reached for {}, dropping queue item {}",
                                updated.max_attempts, label, item.id
                            );
                            if let Err(re) = self.inner.queue.remove(&item.id).await {
                                log::error!("Failed to drop exhausted queue item {}: {}", item.id, re);
                            }
                        }
                        Ok(_) => {}
                        Err(se) => log::error!("Failed to record attempt for queue item {}: {}", item.id, se),
                    }

                    summary.error_count += 1;
                    self.emit(SyncEvent::ItemError {
                        entity_type: item.entity_type,
                        operation: item.operation,
                        error: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Sync completed: {} success, {} errors, {} total",
            summary.success_count, summary.error_count, summary.total_count
        );
        self.emit(SyncEvent::Complete(summary));
        Ok(Some(summary))
    }

    async fn drain_items(&self) -> Result<Vec<super::models::SyncQueueItem>, SyncEngineError> {
        self.ensure_init().await?;
        Ok(self.inner.queue.list().await?)
    }

    /// Drain now; fails when offline
    pub async fn force_sync(&self) -> Result<Option<SyncSummary>, SyncEngineError> {
        if !self.inner.monitor.is_online() {
            return Err(SyncEngineError::Offline);
        }
        self.sync_offline_changes().await
    }

    // =========================================================================
    // Maintenance & Status
    // =========================================================================

    /// Prune cache records and queue items older than `max_age`
    /// (default: 7 days)
    pub async fn cleanup_old_data(&self, max_age: Option<Duration>) -> Result<CleanupReport, SyncEngineError> {
        self.ensure_init().await?;

        let max_age = max_age.unwrap_or(self.inner.config.cache_max_age);
        let report = self.inner.store.clear_expired_data(max_age).await?;

        if report.queue_items_removed > 0 {
            log::warn!(
                "Cleanup dropped {} undelivered queue items older than {:?}",
                report.queue_items_removed, max_age
            );
        }
        log::info!("Cleanup removed {} cached entries", report.cache_entries_removed);
        Ok(report)
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats, SyncEngineError> {
        self.ensure_init().await?;
        Ok(self.inner.store.storage_usage().await?)
    }

    pub fn get_network_status(&self) -> NetworkStatusReport {
        let state = self.inner.monitor.state();
        NetworkStatusReport {
            is_online: state.status.is_online(),
            last_check: state.last_check_at,
            last_transition: state.last_transition_at,
            connection_type: state.connection_type.unwrap_or_else(|| "unknown".to_string()),
        }
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn on_network_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        self.inner.monitor.subscribe(listener)
    }

    pub fn on_sync_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.sync_listeners.subscribe(listener)
    }

    fn emit(&self, event: SyncEvent) {
        log::debug!("Sync event: {}", event.as_str());
        self.inner.sync_listeners.emit(&event);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the probe loop and the periodic drain
    pub fn start(&self) -> Result<(), SyncEngineError> {
        match self.inner.monitor.start() {
            Ok(()) | Err(SchedulerError::AlreadyRunning) => {}
            Err(e) => return Err(e.into()),
        }

        let weak = Arc::downgrade(&self.inner);
        let result = self.inner.drain_scheduler.start(move || {
            let engine = weak.upgrade().map(|inner| SyncEngine { inner });
            async move {
                if let Some(engine) = engine {
                    engine.periodic_drain().await;
                }
            }
        });

        if let Err(e) = result {
            if let Err(stop_err) = self.inner.monitor.stop() {
                log::debug!("Monitor stop after failed start: {}", stop_err);
            }
            return Err(e.into());
        }

        log::info!("Sync engine started");
        Ok(())
    }

    /// Stop background timers; queued items stay queued
    pub fn stop(&self) -> Result<(), SyncEngineError> {
        if let Err(e) = self.inner.monitor.stop() {
            log::debug!("Network monitor was not running: {}", e);
        }
        self.inner.drain_scheduler.stop()?;
        log::info!("Sync engine stopped");
        Ok(())
    }

    async fn periodic_drain(&self) {
        if !self.inner.monitor.is_online() || self.is_syncing() {
            log::debug!("Periodic drain skipped");
            return;
        }
        if let Err(e) = self.sync_offline_changes().await {
            log::error!("Periodic drain failed: {}", e);
        }
    }
}

/// Run a drain on a background task
fn spawn_drain(weak: &Weak<EngineInner>, trigger: &'static str) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let engine = SyncEngine { inner };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            log::info!("Starting queue drain ({})", trigger);
            handle.spawn(async move {
                if let Err(e) = engine.sync_offline_changes().await {
                    log::error!("Queue drain after {} failed: {}", trigger, e);
                }
            });
        }
        Err(_) => log::warn!("No async runtime available for {} drain", trigger),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::store::SqliteStore;
    use crate::sync::entities::{Episode, Transcript};
    use crate::sync::network::NetworkStatus;
    use crate::sync::remote::RemoteError;
    use crate::sync::test_support::{ScriptedProbe, ScriptedRemote};

    fn engine(status: NetworkStatus) -> (SyncEngine, Arc<ScriptedRemote>) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let remote = Arc::new(ScriptedRemote::new());
        let probe = Arc::new(ScriptedProbe::new(status.is_online()));
        let monitor = NetworkMonitor::new(probe, status, MonitorConfig::default());
        let engine = SyncEngine::new(store, remote.clone(), monitor, SyncConfig::default());
        (engine, remote)
    }

    fn episode(slug: &str, date: &str) -> Entity {
        Entity::Episode(Episode {
            slug: slug.into(),
            date: Some(date.into()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_force_sync_offline_fails() {
        let (engine, _) = engine(NetworkStatus::Offline);

        let result = engine.force_sync().await;
        assert!(matches!(result, Err(SyncEngineError::Offline)));
    }

    #[tokio::test]
    async fn test_drain_offline_is_noop() {
        let (engine, remote) = engine(NetworkStatus::Offline);
        engine
            .save_data(Entity::Transcript(Transcript::new(Some(1), "ep", "es")), Operation::Update)
            .await
            .unwrap();

        assert_eq!(engine.sync_offline_changes().await.unwrap(), None);
        assert_eq!(remote.write_calls(), 0);
        assert_eq!(engine.queue().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_episode_listing_from_cache() {
        let (engine, _) = engine(NetworkStatus::Offline);

        let err = engine.load_data(LoadRequest::Episodes).await.unwrap_err();
        assert_eq!(err.to_string(), "No episodes data available offline");

        engine.save_data(episode("older", "2025-01-01"), Operation::Create).await.unwrap();
        engine.save_data(episode("newer", "2026-01-28"), Operation::Create).await.unwrap();

        let outcome = engine.load_data(LoadRequest::Episodes).await.unwrap();
        assert_eq!(outcome.source, DataSource::Cache);
        let EntityData::Episodes(list) = outcome.data else {
            panic!("expected listing");
        };
        let slugs: Vec<_> = list.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["newer", "older"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_load_refreshes_cache() {
        let (engine, remote) = engine(NetworkStatus::Online);
        let fresh = Transcript::new(Some(5), "ep", "ru");
        remote.push_fetch(Ok(EntityData::Transcript(fresh.clone())));

        let outcome = engine.load_data(LoadRequest::transcript("ep", "ru")).await.unwrap();
        assert_eq!(outcome.source, DataSource::Server);

        remote.fail_fetches(Some(RemoteError::Transient("Failed to fetch".into())));
        let outcome = engine.load_data(LoadRequest::transcript("ep", "ru")).await.unwrap();
        assert_eq!(outcome.source, DataSource::Cache);
        assert_eq!(outcome.data, EntityData::Transcript(fresh));
    }

    #[tokio::test]
    async fn test_network_status_report() {
        let (engine, _) = engine(NetworkStatus::Online);

        let report = engine.get_network_status();
        assert!(report.is_online);
        assert_eq!(report.connection_type, "unknown");
        assert!(report.last_check.is_none());

        engine.monitor().set_connection_type(Some("wifi".into()));
        assert_eq!(engine.get_network_status().connection_type, "wifi");
    }

    #[tokio::test]
    async fn test_cleanup_and_stats() {
        let (engine, _) = engine(NetworkStatus::Offline);
        engine
            .save_data(Entity::Transcript(Transcript::new(Some(1), "ep", "es")), Operation::Update)
            .await
            .unwrap();

        let stats = engine.get_storage_stats().await.unwrap();
        assert_eq!(stats.transcripts, 1);
        assert_eq!(stats.pending_mutations, 1);

        let report = engine.cleanup_old_data(None).await.unwrap();
        assert_eq!(report, CleanupReport::default());

        let report = engine.cleanup_old_data(Some(Duration::ZERO)).await.unwrap();
        assert_eq!(report.cache_entries_removed, 1);
        assert_eq!(report.queue_items_removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_drain_delivers_queue() {
        let (engine, remote) = engine(NetworkStatus::Online);
        remote.fail_writes(Some(RemoteError::Rejected("constraint violation".into())));
        engine
            .save_data(Entity::Transcript(Transcript::new(Some(1), "ep", "es")), Operation::Update)
            .await
            .unwrap();
        assert_eq!(engine.queue().len().await.unwrap(), 1);

        remote.fail_writes(None);
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(SyncEngineError::Scheduler(SchedulerError::AlreadyRunning))));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.queue().is_empty().await.unwrap());
        assert_eq!(remote.accepted_writes().len(), 1);

        engine.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_drain_skipped_offline() {
        let (engine, remote) = engine(NetworkStatus::Offline);
        engine
            .save_data(Entity::Transcript(Transcript::new(Some(1), "ep", "es")), Operation::Update)
            .await
            .unwrap();

        engine.start().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(remote.write_calls(), 0);
        assert_eq!(engine.queue().len().await.unwrap(), 1);
        engine.stop().unwrap();
    }
}
