use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CuratorConfig;

const USER_AGENT: &str = "MidnightCurator/1.0";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to decode archive response for {context}: {source}")]
    Decode {
        source: serde_json::Error,
        context: String,
    },
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

/// A search result considered for acquisition. Immutable once built;
/// dropped after selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateVideo {
    pub identifier: String,
    pub title: String,
    pub duration_seconds: u64,
    pub popularity: u64,
    pub source_query: String,
}

/// The smallest playable file resolved from an item's metadata.
#[derive(Debug, Clone)]
pub struct ResolvedAsset {
    pub candidate: CandidateVideo,
    pub download_url: String,
    pub size_bytes: u64,
}

/// One record of the search endpoint's `response.docs` list. The archive
/// returns loosely typed fields (numbers as strings, scalars as arrays),
/// so everything except the identifier deserializes permissively.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchDoc {
    pub identifier: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "flexible_seconds")]
    pub duration: u64,
    #[serde(default, deserialize_with = "flexible_count")]
    pub downloads: u64,
}

impl SearchDoc {
    fn into_candidate(self, source_query: &str) -> CandidateVideo {
        let title = self
            .title
            .unwrap_or_else(|| self.identifier.clone());
        CandidateVideo {
            identifier: self.identifier,
            title,
            duration_seconds: self.duration,
            popularity: self.downloads,
            source_query: source_query.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

/// Item metadata as served by the metadata endpoint: the file listing plus
/// the server/path fields used to build absolute download URLs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemMetadata {
    #[serde(default)]
    pub files: Vec<ItemFile>,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub dir: String,
}

impl ItemMetadata {
    /// `https://{server}{dir}/{name}`; a server value that already carries
    /// a scheme is used verbatim, which lets tests point at `file://`
    /// fixtures.
    pub fn download_url(&self, file_name: &str) -> String {
        if self.server.contains("://") {
            format!("{}{}/{}", self.server, self.dir, file_name)
        } else {
            format!("https://{}{}/{}", self.server, self.dir, file_name)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemFile {
    pub name: String,
    #[serde(default, deserialize_with = "flexible_size")]
    pub size: Option<u64>,
}

/// Picks the smallest file with the wanted extension and a declared size.
/// Smallest wins: the curator optimizes acquisition latency, not quality.
pub fn pick_smallest_eligible<'a>(files: &'a [ItemFile], extension: &str) -> Option<&'a ItemFile> {
    let suffix = format!(".{extension}");
    files
        .iter()
        .filter(|file| file.name.ends_with(&suffix) && file.size.is_some())
        .min_by_key(|file| file.size)
}

/// Transport seam over the archive's HTTP endpoints so pipeline tests can
/// script search results and metadata without a network.
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    async fn search_page(&self, query: &str, rows: u32) -> ArchiveResult<Vec<SearchDoc>>;
    async fn item_metadata(&self, identifier: &str) -> ArchiveResult<ItemMetadata>;
}

pub struct HttpArchiveTransport {
    client: Client,
    endpoint: String,
    metadata_endpoint: String,
}

impl HttpArchiveTransport {
    pub fn new(config: &CuratorConfig) -> ArchiveResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.search.request_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.search.endpoint.clone(),
            metadata_endpoint: config.search.metadata_endpoint.clone(),
        })
    }
}

#[async_trait]
impl ArchiveTransport for HttpArchiveTransport {
    async fn search_page(&self, query: &str, rows: u32) -> ArchiveResult<Vec<SearchDoc>> {
        let rows = rows.to_string();
        let params = [
            ("q", query),
            ("fl[]", "identifier"),
            ("fl[]", "title"),
            ("fl[]", "duration"),
            ("fl[]", "downloads"),
            ("sort[]", "downloads desc"),
            ("rows", rows.as_str()),
            ("output", "json"),
        ];
        let body = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let envelope: SearchEnvelope =
            serde_json::from_str(&body).map_err(|source| ArchiveError::Decode {
                source,
                context: format!("query {query}"),
            })?;
        Ok(envelope.response.docs)
    }

    async fn item_metadata(&self, identifier: &str) -> ArchiveResult<ItemMetadata> {
        let url = format!(
            "{}/{identifier}",
            self.metadata_endpoint.trim_end_matches('/')
        );
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        serde_json::from_str(&body).map_err(|source| ArchiveError::Decode {
            source,
            context: format!("item {identifier}"),
        })
    }
}

/// Issues one search per configured query with a fixed delay in between,
/// and resolves candidates to their smallest playable file.
pub struct ArchiveSearcher {
    config: Arc<CuratorConfig>,
    transport: Arc<dyn ArchiveTransport>,
}

impl ArchiveSearcher {
    pub fn new(config: Arc<CuratorConfig>, transport: Arc<dyn ArchiveTransport>) -> Self {
        Self { config, transport }
    }

    /// Runs every configured query and concatenates whatever parses.
    /// A failed query is logged and skipped; it never aborts the batch,
    /// so the returned list may be shorter than expected but is never
    /// an error.
    pub async fn collect(&self) -> Vec<CandidateVideo> {
        let queries = self.config.search.effective_queries();
        let rows = self.config.limits.rows_per_query;
        let delay = Duration::from_millis(self.config.search.query_delay_ms);
        let mut records = Vec::new();
        for (index, query) in queries.iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.transport.search_page(query, rows).await {
                Ok(docs) => {
                    debug!(query = %query, records = docs.len(), "search query parsed");
                    records.extend(docs.into_iter().map(|doc| doc.into_candidate(query)));
                }
                Err(err) => {
                    warn!(query = %query, error = %err, "search query failed, skipping");
                }
            }
        }
        records
    }

    /// Resolves a candidate to its smallest eligible file. `Ok(None)`
    /// means the item simply has nothing playable, which is a legal
    /// outcome, not an error.
    pub async fn resolve(&self, candidate: &CandidateVideo) -> ArchiveResult<Option<ResolvedAsset>> {
        let metadata = self.transport.item_metadata(&candidate.identifier).await?;
        let extension = &self.config.download.extension;
        let Some(file) = pick_smallest_eligible(&metadata.files, extension) else {
            return Ok(None);
        };
        let size_bytes = file.size.unwrap_or(0);
        Ok(Some(ResolvedAsset {
            candidate: candidate.clone(),
            download_url: metadata.download_url(&file.name),
            size_bytes,
        }))
    }
}

fn flexible_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_string(&value))
}

fn flexible_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_seconds(&value))
}

fn flexible_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_count(&value))
}

fn flexible_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let size = coerce_count(&value);
    Ok(match &value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) if text.trim().parse::<f64>().is_err() => None,
        serde_json::Value::Number(_) | serde_json::Value::String(_) => Some(size),
        _ => None,
    })
}

fn coerce_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(text) => Some(text.clone()),
        serde_json::Value::Array(items) => items.first().and_then(coerce_string),
        _ => None,
    }
}

/// Durations arrive as numbers, numeric strings, `HH:MM:SS` strings, or
/// one-element arrays of any of those. Anything unparseable becomes 0,
/// which the selector treats as "unknown" rather than rejecting.
fn coerce_seconds(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(number) => number.as_f64().map(|v| v.max(0.0) as u64).unwrap_or(0),
        serde_json::Value::String(text) => parse_seconds_text(text),
        serde_json::Value::Array(items) => items.first().map(coerce_seconds).unwrap_or(0),
        _ => 0,
    }
}

fn coerce_count(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(number) => number.as_f64().map(|v| v.max(0.0) as u64).unwrap_or(0),
        serde_json::Value::String(text) => text.trim().parse::<f64>().map(|v| v.max(0.0) as u64).unwrap_or(0),
        serde_json::Value::Array(items) => items.first().map(coerce_count).unwrap_or(0),
        _ => 0,
    }
}

fn parse_seconds_text(text: &str) -> u64 {
    let trimmed = text.trim();
    if let Ok(seconds) = trimmed.parse::<f64>() {
        return seconds.max(0.0) as u64;
    }
    if trimmed.contains(':') {
        let mut total = 0u64;
        for part in trimmed.split(':') {
            let Ok(unit) = part.parse::<u64>() else {
                return 0;
            };
            total = total * 60 + unit;
        }
        return total;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_envelope_parses_loose_fields() {
        let payload = json!({
            "response": {
                "numFound": 3,
                "docs": [
                    {"identifier": "clip-a", "title": "Clip A", "duration": "634.21", "downloads": 120},
                    {"identifier": "clip-b", "duration": "10:02", "downloads": "88"},
                    {"identifier": "clip-c", "title": ["First", "Second"], "duration": ["95"], "downloads": null},
                ]
            }
        });
        let envelope: SearchEnvelope = serde_json::from_value(payload).expect("should parse");
        let docs = envelope.response.docs;
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].duration, 634);
        assert_eq!(docs[1].duration, 602);
        assert_eq!(docs[1].downloads, 88);
        assert_eq!(docs[2].title.as_deref(), Some("First"));
        assert_eq!(docs[2].duration, 95);
        assert_eq!(docs[2].downloads, 0);
    }

    #[test]
    fn malformed_durations_become_zero() {
        assert_eq!(coerce_seconds(&json!("not a duration")), 0);
        assert_eq!(coerce_seconds(&json!("12:xx")), 0);
        assert_eq!(coerce_seconds(&json!(null)), 0);
        assert_eq!(coerce_seconds(&json!({"nested": 5})), 0);
        assert_eq!(coerce_seconds(&json!("1:02:03")), 3723);
        assert_eq!(coerce_seconds(&json!(42.9)), 42);
    }

    #[test]
    fn candidate_title_falls_back_to_identifier() {
        let doc: SearchDoc =
            serde_json::from_value(json!({"identifier": "late-night-psa"})).expect("should parse");
        let candidate = doc.into_candidate("subject:psa");
        assert_eq!(candidate.title, "late-night-psa");
        assert_eq!(candidate.source_query, "subject:psa");
        assert_eq!(candidate.duration_seconds, 0);
    }

    #[test]
    fn smallest_eligible_file_wins() {
        let files = vec![
            ItemFile {
                name: "feature.mp4".to_string(),
                size: Some(900_000_000),
            },
            ItemFile {
                name: "feature.ia.mp4".to_string(),
                size: Some(120_000_000),
            },
            ItemFile {
                name: "feature.ogv".to_string(),
                size: Some(1_000),
            },
            ItemFile {
                name: "feature_512kb.mp4".to_string(),
                size: None,
            },
        ];
        let picked = pick_smallest_eligible(&files, "mp4").expect("one file should qualify");
        assert_eq!(picked.name, "feature.ia.mp4");
    }

    #[test]
    fn no_eligible_file_is_none() {
        let files = vec![ItemFile {
            name: "notes.txt".to_string(),
            size: Some(100),
        }];
        assert!(pick_smallest_eligible(&files, "mp4").is_none());
    }

    #[test]
    fn metadata_sizes_parse_from_strings() {
        let metadata: ItemMetadata = serde_json::from_value(json!({
            "files": [
                {"name": "clip.mp4", "size": "2048"},
                {"name": "clip.thumbs/frame.jpg", "size": "broken"},
            ],
            "server": "ia801409.us.archive.org",
            "dir": "/5/items/clip"
        }))
        .expect("should parse");
        assert_eq!(metadata.files[0].size, Some(2048));
        assert_eq!(metadata.files[1].size, None);
        assert_eq!(
            metadata.download_url("clip.mp4"),
            "https://ia801409.us.archive.org/5/items/clip/clip.mp4"
        );
    }

    #[test]
    fn download_url_keeps_explicit_scheme() {
        let metadata = ItemMetadata {
            files: Vec::new(),
            server: "file:///tmp/fixtures".to_string(),
            dir: String::new(),
        };
        assert_eq!(
            metadata.download_url("clip.mp4"),
            "file:///tmp/fixtures/clip.mp4"
        );
    }
}
