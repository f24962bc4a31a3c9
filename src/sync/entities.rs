//! Entity Shapes - Domain objects carried through the sync engine
//!
//! The engine itself treats these as opaque payloads addressed by a natural
//! key; only the remote adapters and validators look inside them.
//!
//! Natural keys:
//! - Episode: `slug`
//! - Transcript: `(episode_slug, lang)`
//! - Timecodes: `(episode_slug, lang)`

use serde::{Deserialize, Serialize};

// ============================================================================
// Episodes
// ============================================================================

/// Episode as shown by the player (flattened from the remote row)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Episode {
    pub slug: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Title in the selected language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Language of the selected audio variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,

    /// All known titles, one per language
    #[serde(default)]
    pub translations: Vec<EpisodeTranslation>,

    /// All audio files, one per language variant
    #[serde(default)]
    pub audio_variants: Vec<AudioVariant>,

    #[serde(default)]
    pub available_variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpisodeTranslation {
    pub lang: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioVariant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

// ============================================================================
// Transcripts
// ============================================================================

fn default_status() -> String {
    "completed".to_string()
}

/// Edited transcript for one episode language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Numeric row id on the remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub episode_slug: String,
    pub lang: String,

    #[serde(default)]
    pub utterances: Vec<Utterance>,

    /// Word-level timings, passed through untouched
    #[serde(default)]
    pub words: Vec<serde_json::Value>,

    #[serde(default)]
    pub text: String,

    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_transcript_data: Option<serde_json::Value>,
}

impl Transcript {
    /// Create an empty transcript for an episode language
    pub fn new(id: Option<i64>, episode_slug: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            id,
            episode_slug: episode_slug.into(),
            lang: lang.into(),
            utterances: Vec::new(),
            words: Vec::new(),
            text: String::new(),
            status: default_status(),
            created_at: None,
            updated_at: None,
            edited_transcript_data: None,
        }
    }
}

/// One speaker turn, times in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,

    pub start: f64,
    pub end: f64,

    #[serde(default)]
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl Utterance {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            id: None,
            start,
            end,
            text: text.into(),
            speaker: None,
        }
    }
}

// ============================================================================
// Timecodes
// ============================================================================

/// Question/timecode list for one episode language
///
/// Saved and synced as a unit: a write replaces the whole remote list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimecodeSet {
    pub episode_slug: String,
    pub lang: String,

    #[serde(default)]
    pub questions: Vec<Timecode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timecode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub episode_slug: String,
    pub lang: String,

    /// Offset in seconds
    pub time: f64,

    #[serde(default)]
    pub title: String,

    /// Remaining remote columns, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Timecode {
    pub fn new(episode_slug: impl Into<String>, lang: impl Into<String>, time: f64, title: impl Into<String>) -> Self {
        Self {
            id: None,
            episode_slug: episode_slug.into(),
            lang: lang.into(),
            time,
            title: title.into(),
            extra: serde_json::Map::new(),
        }
    }
}
