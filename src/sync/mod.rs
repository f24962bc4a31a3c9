//! Sync Module - Offline-First Data Synchronization
//!
//! Keeps locally persisted episodes, transcripts and timecodes in step with
//! the hosted backend under intermittent connectivity:
//! - Local writes are never lost (write-through plus durable queue)
//! - Reads fall back to the local cache when the remote is unreachable
//! - Queued mutations drain when connectivity returns
//!
//! Architecture:
//! - NetworkMonitor: ONLINE/OFFLINE belief from platform signals and probing
//! - SyncQueue: durable FIFO of pending mutations on top of `LocalStore`
//! - RetryableRemoteClient: bounded backoff for transient failures only
//! - SyncEngine: save/load/drain orchestration, single-flight drain

pub mod api;
pub mod engine;
pub mod entities;
pub mod events;
pub mod models;
pub mod network;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;


// Re-export commonly used types
pub use api::HttpDataService;
pub use engine::{NetworkStatusReport, SyncEngine, SyncEngineError};
pub use entities::{AudioVariant, Episode, EpisodeTranslation, Timecode, TimecodeSet, Transcript, Utterance};
pub use events::{Listeners, Subscription, SyncEvent};
pub use models::{
    CacheRecord, DataSource, Entity, EntityData, EntityType, LoadOutcome, LoadRequest, Operation,
    SaveOutcome, SyncQueueItem, SyncSummary,
};
pub use network::{HttpProbe, NetworkMonitor, NetworkState, NetworkStatus, PlatformSignal, ReachabilityProbe};
pub use queue::SyncQueue;
pub use remote::{RemoteDataService, RemoteError};
pub use retry::{RetryPolicy, RetryableRemoteClient};
pub use scheduler::{BackgroundScheduler, SchedulerConfig, SchedulerError};
pub use validate::{is_compatible_with_database, validate_transcript, ValidationReport};
