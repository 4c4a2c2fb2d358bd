use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;

/// How an information item entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// Fetched from a URL by the crawler
    Crawl,
    /// Supplied directly by a caller
    Manual,
}

impl SourceType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Crawl => "crawl",
            SourceType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "crawl" => Ok(SourceType::Crawl),
            "manual" => Ok(SourceType::Manual),
            other => Err(CoreError::Deserialization(format!(
                "Unknown source type '{other}'"
            ))),
        }
    }
}

/// Where an item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_type: SourceType,
    /// Display name of the source (site name, "analyst note", ...)
    pub name: String,
    pub url: Option<String>,
}

impl SourceRef {
    /// Key used for deduplication: the URL when present, otherwise `type:name`.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match &self.url {
            Some(url) => url.trim().trim_end_matches('/').to_lowercase(),
            None => format!(
                "{}:{}",
                self.source_type.as_str(),
                self.name.trim().to_lowercase()
            ),
        }
    }
}

/// Format of the stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentFormat {
    Text,
    Markdown,
    Html,
}

impl ContentFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFormat::Text => "text",
            ContentFormat::Markdown => "markdown",
            ContentFormat::Html => "html",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "text" => Ok(ContentFormat::Text),
            "markdown" => Ok(ContentFormat::Markdown),
            "html" => Ok(ContentFormat::Html),
            other => Err(CoreError::Deserialization(format!(
                "Unknown content format '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "bullish" => Ok(Sentiment::Positive),
            "neutral" | "mixed" => Ok(Sentiment::Neutral),
            "negative" | "bearish" => Ok(Sentiment::Negative),
            other => Err(CoreError::AnalysisFailure(format!(
                "Unrecognized sentiment '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Importance {
    Low,
    Medium,
    High,
}

impl Importance {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Importance::Low),
            "medium" | "moderate" => Ok(Importance::Medium),
            "high" | "critical" => Ok(Importance::High),
            other => Err(CoreError::AnalysisFailure(format!(
                "Unrecognized importance '{other}'"
            ))),
        }
    }
}

/// Fields derived by analysis. Present exactly when an item is PROCESSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    pub sentiment: Sentiment,
    /// -1.0 (very negative) ..= 1.0 (very positive)
    pub sentiment_score: f64,
    pub importance: Importance,
    pub market_impact: String,
    pub processed_at: DateTime<Utc>,
}

/// Flat status label, as stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InfoStatus {
    Pending,
    Processed,
    Failed,
}

impl InfoStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoStatus::Pending => "PENDING",
            InfoStatus::Processed => "PROCESSED",
            InfoStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "PENDING" => Ok(InfoStatus::Pending),
            "PROCESSED" => Ok(InfoStatus::Processed),
            "FAILED" => Ok(InfoStatus::Failed),
            other => Err(CoreError::Deserialization(format!(
                "Unknown information status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for InfoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of an information item.
///
/// `Pending` transitions exactly once, to `Processed` or `Failed`; both are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessingState {
    Pending,
    Processed(Analysis),
    Failed { reason: String },
}

impl ProcessingState {
    #[must_use]
    pub fn status(&self) -> InfoStatus {
        match self {
            ProcessingState::Pending => InfoStatus::Pending,
            ProcessingState::Processed(_) => InfoStatus::Processed,
            ProcessingState::Failed { .. } => InfoStatus::Failed,
        }
    }

    #[must_use]
    pub fn analysis(&self) -> Option<&Analysis> {
        match self {
            ProcessingState::Processed(analysis) => Some(analysis),
            ProcessingState::Pending | ProcessingState::Failed { .. } => None,
        }
    }
}

/// An ingested content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInformation {
    pub id: Uuid,
    pub source: SourceRef,
    pub title: String,
    pub content: String,
    pub content_format: ContentFormat,
    /// SHA-256 (hex) of the normalized content
    pub fingerprint: String,
    pub tags: Vec<String>,
    /// Linked [`AssetMeta`](super::asset::AssetMeta) ids
    pub linked_assets: Vec<i64>,
    pub state: ProcessingState,
    /// Set when this item is a re-submission of a FAILED item
    pub attempt_of: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MarketInformation {
    #[must_use]
    pub fn status(&self) -> InfoStatus {
        self.state.status()
    }
}

/// Caller-supplied content for manual intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualInput {
    pub title: String,
    pub content: String,
    pub format: ContentFormat,
    pub source_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Symbols the content is explicitly about; assets are created if missing
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Request for crawl intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    /// Defaults to the URL's host
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_name: None,
            tags: Vec::new(),
            symbols: Vec::new(),
        }
    }
}

/// What the pipeline did with an intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOutcome {
    /// A new record was created and analysis ran to the given terminal status
    Created(InfoStatus),
    /// An equivalent record existed; its tags/links were merged instead
    DuplicateSkipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub id: Uuid,
    pub outcome: IngestOutcome,
}

/// Filter for listing information items. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoFilter {
    pub tag: Option<String>,
    pub status: Option<InfoStatus>,
    pub symbol: Option<String>,
    pub limit: Option<usize>,
}

/// Normalize a tag: trimmed, lowercased, inner whitespace collapsed to '-'.
#[must_use]
pub fn normalize_tag(tag: &str) -> String {
    tag.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Merge `incoming` tags into `existing`, keeping order and skipping duplicates.
pub fn merge_tags(existing: &mut Vec<String>, incoming: &[String]) -> bool {
    let mut changed = false;
    for tag in incoming.iter().map(|t| normalize_tag(t)) {
        if !tag.is_empty() && !existing.contains(&tag) {
            existing.push(tag);
            changed = true;
        }
    }
    changed
}
