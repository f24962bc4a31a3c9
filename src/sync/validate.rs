//! Entity Validation
//!
//! Two levels of checking:
//! - `check_queueable`: the minimal structure a mutation needs before it may
//!   enter the sync queue (an unsyncable item would only burn attempts)
//! - `validate_transcript`: full content validation used by the remote
//!   adapter before inserting a transcript

use super::entities::Transcript;
use super::models::Entity;

/// Outcome of a full validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All errors joined into one message
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

/// Whether the transcript can be addressed on the remote store
///
/// Remote transcript rows are keyed by a positive integer id.
pub fn is_compatible_with_database(transcript: &Transcript) -> bool {
    matches!(transcript.id, Some(id) if id > 0)
}

/// Minimal structural validation for queueing
pub fn check_queueable(entity: &Entity) -> Result<(), String> {
    match entity {
        Entity::Episode(episode) => {
            if episode.slug.trim().is_empty() {
                return Err("episode slug is required".to_string());
            }
        }
        Entity::Transcript(transcript) => {
            if !is_compatible_with_database(transcript) {
                return Err(format!(
                    "invalid transcript id {:?}: must be a positive integer",
                    transcript.id
                ));
            }
            require_pair(&transcript.episode_slug, &transcript.lang)?;
        }
        Entity::Timecodes(set) => {
            require_pair(&set.episode_slug, &set.lang)?;
        }
    }
    Ok(())
}

fn require_pair(episode_slug: &str, lang: &str) -> Result<(), String> {
    if episode_slug.trim().is_empty() {
        return Err("episode slug is required".to_string());
    }
    if lang.trim().is_empty() {
        return Err("language is required".to_string());
    }
    Ok(())
}

/// Validate transcript content, collecting every problem found
pub fn validate_transcript(transcript: &Transcript) -> ValidationReport {
    let mut errors = Vec::new();

    if transcript.episode_slug.trim().is_empty() {
        errors.push("Episode slug is required".to_string());
    }

    if transcript.lang.trim().is_empty() {
        errors.push("Language is required".to_string());
    }

    for (index, utterance) in transcript.utterances.iter().enumerate() {
        if !utterance.start.is_finite() || utterance.start < 0.0 {
            errors.push(format!(
                "Utterance at index {} must have a valid start time (number >= 0)",
                index
            ));
        }

        if !utterance.end.is_finite() || utterance.end <= utterance.start {
            errors.push(format!(
                "Utterance at index {} must have a valid end time (number > start)",
                index
            ));
        }

        if utterance.text.trim().is_empty() {
            errors.push(format!("Utterance at index {} must have text content", index));
        }
    }

    ValidationReport { errors }
}
