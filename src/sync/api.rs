//! Remote API Client - HTTP adapters for the hosted REST backend
//!
//! Implements `RemoteDataService` against a PostgREST-style API:
//! - Episodes (with embedded translations and audio variants)
//! - Transcripts (latest row per episode language)
//! - Timecodes (replace-all per episode language)
//!
//! Inserts are sent as upserts (`Prefer: resolution=merge-duplicates`) so a
//! mutation delivered twice lands once.

use super::entities::{AudioVariant, Episode, EpisodeTranslation, TimecodeSet, Timecode, Transcript, Utterance};
use super::models::{Entity, EntityData, LoadRequest, Operation};
use super::remote::{RemoteDataService, RemoteError};
use super::validate::{is_compatible_with_database, validate_transcript};
use crate::config::{ConfigError, RemoteConfig};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

const EPISODE_SELECT: &str = "slug,date,created_at,transcripts(title,lang),episode_audios(audio_url,lang,duration)";
const TRANSCRIPT_SELECT: &str = "id,episode_slug,lang,status,created_at,updated_at,edited_transcript_data";

const FALLBACK_LANG: &str = "es";
const MIXED_LANG: &str = "mixed";

const UPSERT_PREFERENCE: &str = "resolution=merge-duplicates,return=minimal";

/// API client for the REST backend
pub struct HttpDataService {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDataService {
    /// Create new API client
    pub fn new(config: &RemoteConfig) -> Result<Self, ConfigError> {
        let mut base_url = Url::parse(&config.base_url)?;
        // `join` replaces the last segment unless the base ends in a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::builder().timeout(config.timeout).build()?,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self
            .base_url
            .join(table)
            .map_err(|e| RemoteError::Rejected(format!("invalid table URL {}: {}", table, e)))?;

        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key).bearer_auth(key);
        }
        Ok(builder)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    async fn fetch_episode(&self, slug: &str, lang: Option<&str>) -> Result<Episode, RemoteError> {
        let response = self
            .request(Method::GET, "episodes")?
            .query(&[("select", EPISODE_SELECT.to_string()), ("slug", eq(slug))])
            .send()
            .await?;

        let rows: Vec<EpisodeRow> = handle_response(response).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("episode {}", slug)))?;

        let episode = flatten_episode(row, lang.unwrap_or(FALLBACK_LANG));
        if episode.slug.is_empty() {
            return Err(RemoteError::InvalidResponse(format!("episode {} has no slug", slug)));
        }
        Ok(episode)
    }

    async fn fetch_episodes(&self) -> Result<Vec<Episode>, RemoteError> {
        let response = self
            .request(Method::GET, "episodes")?
            .query(&[("select", EPISODE_SELECT), ("order", "date.desc")])
            .send()
            .await?;

        let rows: Vec<EpisodeRow> = handle_response(response).await?;
        Ok(rows
            .into_iter()
            .map(|row| flatten_episode(row, FALLBACK_LANG))
            .filter(|episode| !episode.slug.is_empty())
            .collect())
    }

    async fn fetch_transcript(&self, episode_slug: &str, lang: &str) -> Result<Transcript, RemoteError> {
        let response = self
            .request(Method::GET, "transcripts")?
            .query(&[
                ("select", TRANSCRIPT_SELECT.to_string()),
                ("episode_slug", eq(episode_slug)),
                ("lang", eq(lang)),
                ("order", "created_at.desc".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<TranscriptRow> = handle_response(response).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("transcript {}:{}", episode_slug, lang)))?;

        row.into_transcript(episode_slug, lang)
    }

    async fn fetch_timecodes(&self, episode_slug: &str, lang: &str) -> Result<TimecodeSet, RemoteError> {
        let response = self
            .request(Method::GET, "timecodes")?
            .query(&[
                ("select", "*".to_string()),
                ("episode_slug", eq(episode_slug)),
                ("lang", eq(lang)),
                ("order", "time.asc".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<Timecode> = handle_response(response).await?;
        Ok(TimecodeSet {
            episode_slug: episode_slug.to_string(),
            lang: lang.to_string(),
            questions: rows.into_iter().filter(|q| q.lang == lang).collect(),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    async fn write_episode(&self, episode: &Episode, operation: Operation) -> Result<(), RemoteError> {
        let row = EpisodeWriteRow {
            slug: &episode.slug,
            date: episode.date.as_deref(),
        };

        let builder = match operation {
            Operation::Create => self
                .request(Method::POST, "episodes")?
                .header("Prefer", UPSERT_PREFERENCE)
                .json(&row),
            Operation::Update => self
                .request(Method::PATCH, "episodes")?
                .query(&[("slug", eq(&episode.slug))])
                .json(&row),
            Operation::Delete => self
                .request(Method::DELETE, "episodes")?
                .query(&[("slug", eq(&episode.slug))]),
        };

        handle_empty(builder.send().await?).await
    }

    async fn write_transcript(&self, transcript: &Transcript, operation: Operation) -> Result<(), RemoteError> {
        match operation {
            Operation::Create => {
                let report = validate_transcript(transcript);
                if !report.is_valid() {
                    return Err(RemoteError::Rejected(format!(
                        "invalid transcript {}:{}: {}",
                        transcript.episode_slug,
                        transcript.lang,
                        report.summary()
                    )));
                }

                let response = self
                    .request(Method::POST, "transcripts")?
                    .header("Prefer", UPSERT_PREFERENCE)
                    .json(transcript)
                    .send()
                    .await?;
                handle_empty(response).await
            }
            Operation::Update | Operation::Delete => {
                let id = match transcript.id {
                    Some(id) if is_compatible_with_database(transcript) => id,
                    _ => {
                        return Err(RemoteError::Rejected(format!(
                            "Invalid transcript ID: {:?}. ID must be a positive integer",
                            transcript.id
                        )))
                    }
                };

                let builder = if operation == Operation::Update {
                    self.request(Method::PATCH, "transcripts")?
                        .json(&json!({ "edited_transcript_data": compact_edited_data(&transcript.utterances) }))
                } else {
                    self.request(Method::DELETE, "transcripts")?
                };

                let response = builder.query(&[("id", eq(&id.to_string()))]).send().await?;
                handle_empty(response).await
            }
        }
    }

    /// Replace the remote list for `(episode_slug, lang)`
    async fn write_timecodes(&self, set: &TimecodeSet, operation: Operation) -> Result<(), RemoteError> {
        let response = self
            .request(Method::DELETE, "timecodes")?
            .query(&[("episode_slug", eq(&set.episode_slug)), ("lang", eq(&set.lang))])
            .send()
            .await?;
        handle_empty(response).await?;

        if operation == Operation::Delete || set.questions.is_empty() {
            return Ok(());
        }

        let response = self
            .request(Method::POST, "timecodes")?
            .header("Prefer", UPSERT_PREFERENCE)
            .json(&set.questions)
            .send()
            .await?;
        handle_empty(response).await
    }
}

#[async_trait]
impl RemoteDataService for HttpDataService {
    async fn fetch(&self, request: &LoadRequest) -> Result<EntityData, RemoteError> {
        match request {
            LoadRequest::Episode { slug, lang } => {
                self.fetch_episode(slug, lang.as_deref()).await.map(EntityData::Episode)
            }
            LoadRequest::Transcript { episode_slug, lang } => {
                self.fetch_transcript(episode_slug, lang).await.map(EntityData::Transcript)
            }
            LoadRequest::Timecodes { episode_slug, lang } => {
                self.fetch_timecodes(episode_slug, lang).await.map(EntityData::Timecodes)
            }
            LoadRequest::Episodes => self.fetch_episodes().await.map(EntityData::Episodes),
        }
    }

    async fn write(&self, entity: &Entity, operation: Operation) -> Result<(), RemoteError> {
        match entity {
            Entity::Episode(episode) => self.write_episode(episode, operation).await,
            Entity::Transcript(transcript) => self.write_transcript(transcript, operation).await,
            Entity::Timecodes(set) => self.write_timecodes(set, operation).await,
        }
    }
}

// ============================================================================
// Remote Row Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct EpisodeRow {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    transcripts: Option<Vec<EpisodeTranslation>>,
    #[serde(default)]
    episode_audios: Option<Vec<AudioVariant>>,
}

#[derive(Debug, Serialize)]
struct EpisodeWriteRow<'a> {
    slug: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct TranscriptRow {
    id: Option<i64>,
    #[serde(default)]
    episode_slug: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    edited_transcript_data: Option<Value>,
}

impl TranscriptRow {
    /// Lift utterances, words and text out of `edited_transcript_data`
    fn into_transcript(self, episode_slug: &str, lang: &str) -> Result<Transcript, RemoteError> {
        let edited = self.edited_transcript_data.clone().unwrap_or(Value::Null);

        let utterances: Vec<Utterance> = match edited.get("utterances") {
            Some(Value::Array(items)) => serde_json::from_value(Value::Array(items.clone()))
                .map_err(|e| RemoteError::InvalidResponse(format!("malformed utterances: {}", e)))?,
            _ => Vec::new(),
        };
        let words = match edited.get("words") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let text = edited
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let now = chrono::Utc::now().to_rfc3339();
        Ok(Transcript {
            id: self.id,
            episode_slug: self.episode_slug.filter(|s| !s.is_empty()).unwrap_or_else(|| episode_slug.to_string()),
            lang: self.lang.filter(|s| !s.is_empty()).unwrap_or_else(|| lang.to_string()),
            utterances,
            words,
            text,
            status: self.status.unwrap_or_else(|| "completed".to_string()),
            created_at: Some(self.created_at.unwrap_or_else(|| now.clone())),
            updated_at: Some(self.updated_at.unwrap_or(now)),
            edited_transcript_data: self.edited_transcript_data,
        })
    }
}

// ============================================================================
// Transformations
// ============================================================================

/// PostgREST equality filter
fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

/// Flatten an episode row, picking title and audio for `target_lang`
///
/// Title: target language, then `es`, then the first translation.
/// Audio: target language, then `es`, then `mixed`, then the first variant.
fn flatten_episode(row: EpisodeRow, target_lang: &str) -> Episode {
    let translations = row.transcripts.unwrap_or_default();
    let audios = row.episode_audios.unwrap_or_default();
    let slug = row.slug.unwrap_or_default();

    let title = translations
        .iter()
        .find(|t| t.lang == target_lang)
        .or_else(|| translations.iter().find(|t| t.lang == FALLBACK_LANG))
        .or_else(|| translations.first())
        .and_then(|t| t.title.clone())
        .unwrap_or_else(|| slug.clone());

    let audio_lang_is = |a: &&AudioVariant, lang: &str| a.lang.as_deref() == Some(lang);
    let audio = audios
        .iter()
        .find(|a| audio_lang_is(a, target_lang))
        .or_else(|| audios.iter().find(|a| audio_lang_is(a, FALLBACK_LANG)))
        .or_else(|| audios.iter().find(|a| audio_lang_is(a, MIXED_LANG)))
        .or_else(|| audios.first());

    Episode {
        date: row.date,
        created_at: row.created_at,
        title: Some(title),
        lang: Some(
            audio
                .and_then(|a| a.lang.clone())
                .unwrap_or_else(|| MIXED_LANG.to_string()),
        ),
        audio_url: audio.and_then(|a| a.audio_url.clone()),
        duration: Some(audio.and_then(|a| a.duration).unwrap_or(0.0)),
        available_variants: audios
            .iter()
            .filter_map(|a| a.lang.clone())
            .filter(|lang| !lang.is_empty())
            .collect(),
        translations,
        audio_variants: audios,
        slug,
    }
}

/// Reduce utterances to the fields the backend stores
fn compact_edited_data(utterances: &[Utterance]) -> Value {
    let compact: Vec<Value> = utterances
        .iter()
        .map(|u| {
            let mut out = json!({ "start": u.start, "end": u.end, "text": u.text });
            if let Some(id) = &u.id {
                out["id"] = id.clone();
            }
            if let Some(speaker) = u.speaker.as_deref().filter(|s| !s.trim().is_empty()) {
                out["speaker"] = Value::String(speaker.to_string());
            }
            out
        })
        .collect();

    json!({ "utterances": compact })
}

// ============================================================================
// Error Handling
// ============================================================================

/// Handle successful JSON response
async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    if response.status().is_success() {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    } else {
        Err(handle_error(response).await)
    }
}

/// Handle a response whose body is not needed
async fn handle_empty(response: reqwest::Response) -> Result<(), RemoteError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(handle_error(response).await)
    }
}

/// Convert error response to RemoteError
async fn handle_error(response: reqwest::Response) -> RemoteError {
    let status = response.status();
    let msg = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::NOT_FOUND => RemoteError::NotFound(msg),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => RemoteError::Transient(format!("{}: {}", status, msg)),
        _ => RemoteError::Rejected(format!("{}: {}", status, msg)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn service(server: &mockito::ServerGuard) -> HttpDataService {
        let mut config = RemoteConfig::new(format!("{}/rest/v1", server.url()));
        config.api_key = Some("anon-key".into());
        HttpDataService::new(&config).unwrap()
    }

    fn episode_row(value: Value) -> EpisodeRow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_flatten_episode_language_fallbacks() {
        let row = json!({
            "slug": "2025-10-22",
            "date": "2025-10-22",
            "transcripts": [
                {"lang": "ru", "title": "Выпуск"},
                {"lang": "es", "title": "Episodio"}
            ],
            "episode_audios": [
                {"lang": "mixed", "audio_url": "https://cdn.example.com/mixed.mp3", "duration": 1800.0},
                {"lang": "ru", "audio_url": "https://cdn.example.com/ru.mp3", "duration": 1700.0}
            ]
        });

        let ru = flatten_episode(episode_row(row.clone()), "ru");
        assert_eq!(ru.title.as_deref(), Some("Выпуск"));
        assert_eq!(ru.lang.as_deref(), Some("ru"));
        assert_eq!(ru.duration, Some(1700.0));

        // No English title or audio: title falls back to es, audio to mixed
        let en = flatten_episode(episode_row(row), "en");
        assert_eq!(en.title.as_deref(), Some("Episodio"));
        assert_eq!(en.lang.as_deref(), Some("mixed"));
        assert_eq!(en.audio_url.as_deref(), Some("https://cdn.example.com/mixed.mp3"));
        assert_eq!(en.available_variants, vec!["mixed", "ru"]);
    }

    #[test]
    fn test_flatten_episode_without_children() {
        let episode = flatten_episode(episode_row(json!({"slug": "2026-01-28"})), "es");

        assert_eq!(episode.title.as_deref(), Some("2026-01-28"));
        assert_eq!(episode.lang.as_deref(), Some("mixed"));
        assert_eq!(episode.duration, Some(0.0));
        assert!(episode.audio_url.is_none());
    }

    #[test]
    fn test_compact_edited_data() {
        let mut with_speaker = Utterance::new(0.0, 1000.0, "Hola");
        with_speaker.speaker = Some("A".into());
        with_speaker.id = Some(json!(1));
        let mut blank_speaker = Utterance::new(1000.0, 2000.0, "Adiós");
        blank_speaker.speaker = Some("  ".into());

        let compact = compact_edited_data(&[with_speaker, blank_speaker]);

        assert_eq!(compact["utterances"][0]["speaker"], "A");
        assert_eq!(compact["utterances"][0]["id"], 1);
        assert!(compact["utterances"][1].get("speaker").is_none());
        assert!(compact["utterances"][1].get("id").is_none());
    }

    #[tokio::test]
    async fn test_fetch_episode() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/episodes")
            .match_query(Matcher::UrlEncoded("slug".into(), "eq.2025-10-22".into()))
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer anon-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([{
                    "slug": "2025-10-22",
                    "date": "2025-10-22",
                    "transcripts": [{"lang": "es", "title": "Episodio"}],
                    "episode_audios": [{"lang": "es", "audio_url": "https://cdn.example.com/es.mp3", "duration": 60.0}]
                }])
                .to_string(),
            )
            .create_async()
            .await;

        let api = service(&server).await;
        let data = api.fetch(&LoadRequest::episode("2025-10-22", Some("es"))).await.unwrap();

        mock.assert_async().await;
        match data {
            EntityData::Episode(episode) => {
                assert_eq!(episode.slug, "2025-10-22");
                assert_eq!(episode.title.as_deref(), Some("Episodio"));
            }
            other => panic!("unexpected data: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_transcript_extracts_edited_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/transcripts")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("episode_slug".into(), "eq.ep".into()),
                Matcher::UrlEncoded("lang".into(), "eq.ru".into()),
                Matcher::UrlEncoded("order".into(), "created_at.desc".into()),
            ]))
            .with_status(200)
            .with_body(
                json!([{
                    "id": 42,
                    "episode_slug": "ep",
                    "lang": "ru",
                    "status": null,
                    "edited_transcript_data": {
                        "utterances": [{"start": 0.0, "end": 1500.0, "text": "Привет"}],
                        "text": "Привет"
                    }
                }])
                .to_string(),
            )
            .create_async()
            .await;

        let api = service(&server).await;
        let data = api.fetch(&LoadRequest::transcript("ep", "ru")).await.unwrap();

        let EntityData::Transcript(transcript) = data else {
            panic!("expected transcript");
        };
        assert_eq!(transcript.id, Some(42));
        assert_eq!(transcript.utterances.len(), 1);
        assert_eq!(transcript.text, "Привет");
        assert_eq!(transcript.status, "completed");
        assert!(transcript.words.is_empty());
        assert!(transcript.created_at.is_some());
    }

    #[tokio::test]
    async fn test_fetch_missing_transcript_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/transcripts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let api = service(&server).await;
        let err = api.fetch(&LoadRequest::transcript("ep", "en")).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_timecodes_filters_language() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/rest/v1/timecodes")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!([
                    {"id": 1, "episode_slug": "ep", "lang": "es", "time": 10.0, "title": "Intro"},
                    {"id": 2, "episode_slug": "ep", "lang": "ru", "time": 20.0, "title": "Вопрос"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let api = service(&server).await;
        let data = api.fetch(&LoadRequest::timecodes("ep", "es")).await.unwrap();

        let EntityData::Timecodes(set) = data else {
            panic!("expected timecodes");
        };
        assert_eq!(set.questions.len(), 1);
        assert_eq!(set.questions[0].title, "Intro");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let mut server = mockito::Server::new_async().await;
        let api = service(&server).await;
        let request = LoadRequest::episode("ep", None);

        let cases = [
            (503, true),
            (502, true),
            (429, true),
            (400, false),
            (409, false),
            (500, false),
        ];
        for (status, transient) in cases {
            let mock = server
                .mock("GET", "/rest/v1/episodes")
                .match_query(Matcher::Any)
                .with_status(status)
                .with_body("failure")
                .create_async()
                .await;

            let err = api.fetch(&request).await.unwrap_err();
            assert_eq!(err.is_transient(), transient, "status {}", status);
            mock.remove_async().await;
        }

        server
            .mock("GET", "/rest/v1/episodes")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        assert_eq!(api.fetch(&request).await.unwrap_err(), RemoteError::Unauthorized);
    }

    #[tokio::test]
    async fn test_transcript_update_sends_compact_patch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/rest/v1/transcripts")
            .match_query(Matcher::UrlEncoded("id".into(), "eq.7".into()))
            .match_body(Matcher::PartialJson(json!({
                "edited_transcript_data": {
                    "utterances": [{"start": 0.0, "end": 900.0, "text": "Hola"}]
                }
            })))
            .with_status(204)
            .create_async()
            .await;

        let mut transcript = Transcript::new(Some(7), "ep", "es");
        transcript.utterances = vec![Utterance::new(0.0, 900.0, "Hola")];

        let api = service(&server).await;
        api.write(&Entity::Transcript(transcript), Operation::Update).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transcript_update_rejects_invalid_id() {
        let server = mockito::Server::new_async().await;
        let api = service(&server).await;

        let err = api
            .write(&Entity::Transcript(Transcript::new(Some(0), "ep", "es")), Operation::Update)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_timecodes_write_replaces_list() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/rest/v1/timecodes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("episode_slug".into(), "eq.ep".into()),
                Matcher::UrlEncoded("lang".into(), "eq.es".into()),
            ]))
            .with_status(204)
            .create_async()
            .await;
        let insert = server
            .mock("POST", "/rest/v1/timecodes")
            .match_header("prefer", UPSERT_PREFERENCE)
            .match_body(Matcher::Json(json!([
                {"episode_slug": "ep", "lang": "es", "time": 5.0, "title": "Intro"}
            ])))
            .with_status(201)
            .create_async()
            .await;

        let set = TimecodeSet {
            episode_slug: "ep".into(),
            lang: "es".into(),
            questions: vec![Timecode::new("ep", "es", 5.0, "Intro")],
        };

        let api = service(&server).await;
        api.write(&Entity::Timecodes(set), Operation::Update).await.unwrap();

        delete.assert_async().await;
        insert.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_timecodes_only_delete() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/rest/v1/timecodes")
            .match_query(Matcher::Any)
            .with_status(204)
            .create_async()
            .await;
        let insert = server
            .mock("POST", "/rest/v1/timecodes")
            .expect(0)
            .create_async()
            .await;

        let set = TimecodeSet {
            episode_slug: "ep".into(),
            lang: "es".into(),
            questions: vec![],
        };

        let api = service(&server).await;
        api.write(&Entity::Timecodes(set), Operation::Create).await.unwrap();

        delete.assert_async().await;
        insert.assert_async().await;
    }
}
