//! Sync and network event fan-out
//!
//! Listeners are invoked synchronously in subscription order. A listener that
//! panics is caught and logged; the remaining listeners still run.

use super::models::{EntityType, Operation, SyncSummary};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

/// Events emitted to sync listeners during a queue drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    #[serde(rename = "sync_start")]
    Start,

    #[serde(rename = "sync_item_success")]
    ItemSuccess {
        entity_type: EntityType,
        operation: Operation,
    },

    #[serde(rename = "sync_item_error")]
    ItemError {
        entity_type: EntityType,
        operation: Operation,
        error: String,
    },

    #[serde(rename = "sync_complete")]
    Complete(SyncSummary),

    #[serde(rename = "sync_error")]
    Error { error: String },
}

impl SyncEvent {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "sync_start",
            Self::ItemSuccess { .. } => "sync_item_success",
            Self::ItemError { .. } => "sync_item_error",
            Self::Complete(_) => "sync_complete",
            Self::Error { .. } => "sync_error",
        }
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Slots<T> = StdMutex<Vec<(u64, Callback<T>)>>;

/// Ordered listener registry
pub struct Listeners<T> {
    slots: Arc<Slots<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(StdMutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; call `unsubscribe` on the returned handle to remove it
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(listener)));

        let weak: Weak<Slots<T>> = Arc::downgrade(&self.slots);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    let mut guard = slots.lock().unwrap_or_else(|e| e.into_inner());
                    guard.retain(|(slot_id, _)| *slot_id != id);
                }
            })),
        }
    }

    /// Deliver an event to every listener
    pub fn emit(&self, event: &T) {
        // Snapshot so listeners may subscribe or unsubscribe while being called
        let callbacks: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();

        for callback in callbacks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                log::error!("Event listener panicked: {}", panic_message(&panic));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Callback<T>)>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle returned by `subscribe`
///
/// Dropping the handle keeps the listener registered.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
