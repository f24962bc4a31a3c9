//! Offline Queue Module - pending mutations waiting for remote delivery
//!
//! When a save cannot reach the remote store (offline, or the remote call
//! failed), the mutation is queued locally and delivered by the next drain.
//!
//! Features:
//! - Durable: backed by the `LocalStore` queue table
//! - Insertion-ordered (FIFO) listing
//! - Attempt counter capped at `max_attempts` (default: 3)
//! - No deduplication; every queued mutation is delivered

use super::models::{Entity, Operation, SyncQueueItem};
use crate::store::{LocalStore, StoreError};
use std::sync::Arc;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Ordered list of pending mutations on top of a `LocalStore`
#[derive(Clone)]
pub struct SyncQueue {
    store: Arc<dyn LocalStore>,
    max_attempts: u32,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self::with_max_attempts(store, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(store: Arc<dyn LocalStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Append a mutation with `attempts = 0`, returning its id
    pub async fn enqueue(&self, payload: Entity, operation: Operation) -> Result<String, StoreError> {
        let item = SyncQueueItem::new(payload, operation, self.max_attempts);
        log::info!(
            "Adding {} {} ({}) to sync queue",
            item.operation,
            item.entity_type,
            item.payload.natural_key()
        );

        self.store.add_to_sync_queue(&item).await?;
        log::debug!("Queue item added with ID: {}", item.id);
        Ok(item.id)
    }

    /// Every pending mutation, oldest first
    pub async fn list(&self) -> Result<Vec<SyncQueueItem>, StoreError> {
        let items = self.store.get_sync_queue().await?;
        log::debug!("Found {} pending queue items", items.len());
        Ok(items)
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.store.get_sync_queue().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.store.remove_sync_item(id).await?;
        log::info!("Removed queue item {}", id);
        Ok(())
    }

    /// Record one failed delivery; `None` if the item no longer exists
    pub async fn increment_attempts(&self, id: &str) -> Result<Option<SyncQueueItem>, StoreError> {
        let updated = self.store.increment_sync_attempts(id).await?;
        match &updated {
            Some(item) => log::info!(
                "Queue item {} failed delivery (attempt {}/{})",
                id, item.attempts, item.max_attempts
            ),
            None => log::warn!("Queue item {} vanished before its attempt was recorded", id),
        }
        Ok(updated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::sync::entities::{Episode, Transcript};
    use crate::sync::models::EntityType;

    fn create_test_queue(max_attempts: u32) -> SyncQueue {
        let store = SqliteStore::in_memory().expect("Failed to create test store");
        SyncQueue::with_max_attempts(Arc::new(store), max_attempts)
    }

    #[tokio::test]
    async fn test_enqueue_and_list() {
        let queue = create_test_queue(DEFAULT_MAX_ATTEMPTS);

        let transcript = Entity::Transcript(Transcript::new(Some(1), "ep", "ru"));
        let episode = Entity::Episode(Episode {
            slug: "ep".into(),
            ..Default::default()
        });

        let first = queue.enqueue(transcript.clone(), Operation::Update).await.unwrap();
        let second = queue.enqueue(episode, Operation::Create).await.unwrap();
        assert_ne!(first, second);

        let items = queue.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first);
        assert_eq!(items[0].entity_type, EntityType::Transcript);
        assert_eq!(items[0].payload, transcript);
        assert_eq!(items[0].attempts, 0);
        assert_eq!(items[0].max_attempts, 3);
        assert_eq!(items[1].operation, Operation::Create);
    }

    #[tokio::test]
    async fn test_same_entity_is_not_deduplicated() {
        let queue = create_test_queue(DEFAULT_MAX_ATTEMPTS);
        let transcript = Entity::Transcript(Transcript::new(Some(1), "ep", "ru"));

        queue.enqueue(transcript.clone(), Operation::Update).await.unwrap();
        queue.enqueue(transcript, Operation::Update).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_increment_and_remove() {
        let queue = create_test_queue(2);
        let transcript = Entity::Transcript(Transcript::new(Some(1), "ep", "ru"));

        let id = queue.enqueue(transcript, Operation::Update).await.unwrap();

        let item = queue.increment_attempts(&id).await.unwrap().unwrap();
        assert_eq!(item.attempts, 1);
        assert!(!item.is_exhausted());

        let item = queue.increment_attempts(&id).await.unwrap().unwrap();
        assert!(item.is_exhausted());

        queue.remove(&id).await.unwrap();
        assert!(queue.is_empty().await.unwrap());
        assert!(queue.increment_attempts(&id).await.unwrap().is_none());
    }
}
