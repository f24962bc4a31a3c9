//! Sync Data Models - Engine-Level Structures
//!
//! Defines the data the engine moves around:
//! - EntityType / Operation: what a mutation touches and how
//! - Entity: tagged union over the known entity payloads
//! - LoadRequest / EntityData: read requests and their results
//! - SyncQueueItem / CacheRecord: rows owned by the local store
//! - SaveOutcome / LoadOutcome / SyncSummary: results returned to callers

use super::entities::{Episode, TimecodeSet, Transcript};
use super::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

// ============================================================================
// Entity Types & Operations
// ============================================================================

/// Kind of entity a mutation or cache record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Episode,
    Transcript,
    Timecodes,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [Self::Episode, Self::Transcript, Self::Timecodes];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Transcript => "transcript",
            Self::Timecodes => "timecodes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "episode" => Some(Self::Episode),
            "transcript" => Some(Self::Transcript),
            "timecodes" => Some(Self::Timecodes),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    #[default]
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A saveable entity payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Entity {
    Episode(Episode),
    Transcript(Transcript),
    Timecodes(TimecodeSet),
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Episode(_) => EntityType::Episode,
            Self::Transcript(_) => EntityType::Transcript,
            Self::Timecodes(_) => EntityType::Timecodes,
        }
    }

    /// Stable key the cache record is stored under
    pub fn natural_key(&self) -> String {
        match self {
            Self::Episode(episode) => episode.slug.clone(),
            Self::Transcript(t) => pair_key(&t.episode_slug, &t.lang),
            Self::Timecodes(set) => pair_key(&set.episode_slug, &set.lang),
        }
    }

    /// Minimal structural check before a mutation may enter the queue
    pub fn check_queueable(&self) -> Result<(), String> {
        validate::check_queueable(self)
    }
}

impl From<Episode> for Entity {
    fn from(value: Episode) -> Self {
        Self::Episode(value)
    }
}

impl From<Transcript> for Entity {
    fn from(value: Transcript) -> Self {
        Self::Transcript(value)
    }
}

impl From<TimecodeSet> for Entity {
    fn from(value: TimecodeSet) -> Self {
        Self::Timecodes(value)
    }
}

/// Key for entities addressed by `(episode_slug, lang)`
///
/// `:` and `%` inside either part are percent-escaped so distinct pairs
/// never share a key.
pub fn pair_key(episode_slug: &str, lang: &str) -> String {
    format!("{}:{}", escape_key_part(episode_slug), escape_key_part(lang))
}

fn escape_key_part(part: &str) -> Cow<'_, str> {
    if part.contains([':', '%']) {
        Cow::Owned(part.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(part)
    }
}

// ============================================================================
// Reads
// ============================================================================

/// What a caller wants to load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LoadRequest {
    /// One episode; `lang` picks the title and audio variant
    Episode { slug: String, lang: Option<String> },
    Transcript { episode_slug: String, lang: String },
    Timecodes { episode_slug: String, lang: String },
    /// Full episode listing
    Episodes,
}

impl LoadRequest {
    pub fn episode(slug: impl Into<String>, lang: Option<&str>) -> Self {
        Self::Episode {
            slug: slug.into(),
            lang: lang.map(str::to_string),
        }
    }

    pub fn transcript(episode_slug: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::Transcript {
            episode_slug: episode_slug.into(),
            lang: lang.into(),
        }
    }

    pub fn timecodes(episode_slug: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::Timecodes {
            episode_slug: episode_slug.into(),
            lang: lang.into(),
        }
    }

    /// Name used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Episode { .. } => "episode",
            Self::Transcript { .. } => "transcript",
            Self::Timecodes { .. } => "timecodes",
            Self::Episodes => "episodes",
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Episode { .. } | Self::Episodes => EntityType::Episode,
            Self::Transcript { .. } => EntityType::Transcript,
            Self::Timecodes { .. } => EntityType::Timecodes,
        }
    }

    /// Cache key for single-entity requests; `None` for listings
    pub fn cache_key(&self) -> Option<String> {
        match self {
            Self::Episode { slug, .. } => Some(slug.clone()),
            Self::Transcript { episode_slug, lang } | Self::Timecodes { episode_slug, lang } => {
                Some(pair_key(episode_slug, lang))
            }
            Self::Episodes => None,
        }
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cache_key() {
            Some(key) => write!(f, "{}({})", self.label(), key),
            None => f.write_str(self.label()),
        }
    }
}

/// Result of a load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EntityData {
    Episode(Episode),
    Transcript(Transcript),
    Timecodes(TimecodeSet),
    Episodes(Vec<Episode>),
}

impl EntityData {
    /// Entities to write into the local cache after a server read
    pub fn cache_entities(&self) -> Vec<Entity> {
        match self {
            Self::Episode(episode) => vec![Entity::Episode(episode.clone())],
            Self::Transcript(t) => vec![Entity::Transcript(t.clone())],
            Self::Timecodes(set) => vec![Entity::Timecodes(set.clone())],
            Self::Episodes(list) => list.iter().cloned().map(Entity::Episode).collect(),
        }
    }
}

impl From<Entity> for EntityData {
    fn from(value: Entity) -> Self {
        match value {
            Entity::Episode(e) => Self::Episode(e),
            Entity::Transcript(t) => Self::Transcript(t),
            Entity::Timecodes(s) => Self::Timecodes(s),
        }
    }
}

/// Where loaded data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Server,
    Cache,
}

// ============================================================================
// Stored Records
// ============================================================================

/// Pending mutation waiting for remote delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub entity_type: EntityType,
    pub operation: Operation,
    pub payload: Entity,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl SyncQueueItem {
    /// Create new queue item with a fresh local id
    pub fn new(payload: Entity, operation: Operation, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: payload.entity_type(),
            operation,
            payload,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
        }
    }

    /// True once the item has used up its delivery attempts
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Last known snapshot of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub entity_type: EntityType,
    pub key: String,
    pub entity: Entity,
    pub cached_at: DateTime<Utc>,
}

// ============================================================================
// Results
// ============================================================================

/// Result of `save_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    /// True when the write was only queued because the network is offline
    pub offline: bool,
}

/// Result of `load_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub data: EntityData,
    pub source: DataSource,
}

/// Counters reported at the end of a queue drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub total_count: usize,
}
