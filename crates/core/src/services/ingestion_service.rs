use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::asset::{validate_symbol, AssetMeta, Market, NewAsset};
use crate::models::market_info::{
    merge_tags, Analysis, ContentFormat, CrawlRequest, InfoFilter, InfoStatus, IngestOutcome,
    IngestReport, ManualInput, MarketInformation, ProcessingState, SourceRef, SourceType,
};
use crate::models::settings::IngestionSettings;
use crate::providers::traits::{AnalysisRequest, AnalysisResult, ContentAnalyzer, PageFetcher};
use crate::providers::web::HtmlExtractor;
use crate::storage::asset_repository::AssetRepository;
use crate::storage::market_info_repository::MarketInfoRepository;

use super::retry::with_timeout;

/// Normalized content ready for dedup and storage.
struct Draft {
    source: SourceRef,
    title: String,
    content: String,
    format: ContentFormat,
    tags: Vec<String>,
    symbols: Vec<String>,
}

/// Removes its id from the in-flight set when dropped, including on cancellation.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Crawl/manual intake, dedup, and analysis of market information.
///
/// Pipeline: normalize → fingerprint → dedup (merge on hit) → store PENDING →
/// analyze → PROCESSED or FAILED. Analysis errors never escape to the caller;
/// they become the record's terminal FAILED state.
pub struct IngestionService {
    infos: MarketInfoRepository,
    assets: AssetRepository,
    fetcher: Arc<dyn PageFetcher>,
    analyzer: Arc<dyn ContentAnalyzer>,
    extractor: HtmlExtractor,
    settings: IngestionSettings,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl IngestionService {
    pub fn new(
        infos: MarketInfoRepository,
        assets: AssetRepository,
        fetcher: Arc<dyn PageFetcher>,
        analyzer: Arc<dyn ContentAnalyzer>,
        settings: IngestionSettings,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            infos,
            assets,
            fetcher,
            analyzer,
            extractor: HtmlExtractor::new()?,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    // ── Intake ──────────────────────────────────────────────────────

    /// Fetch a page and ingest its readable text.
    pub async fn crawl_market_info(&self, request: &CrawlRequest) -> Result<IngestReport, CoreError> {
        let url = parse_http_url(&request.url)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let page = with_timeout(
            self.fetcher.fetch(url.as_str()),
            self.settings.fetch_timeout(),
            "fetch page",
        )
        .await?;
        if page.markdown.trim().is_empty() {
            return Err(CoreError::ValidationError(format!(
                "Page {url} has no readable text"
            )));
        }

        let source_name = request
            .source_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&host)
            .to_string();
        let title = if page.title.trim().is_empty() {
            source_name.clone()
        } else {
            page.title.trim().to_string()
        };

        self.intake(Draft {
            source: SourceRef {
                source_type: SourceType::Crawl,
                name: source_name,
                url: Some(url.to_string()),
            },
            title,
            content: page.markdown,
            format: ContentFormat::Markdown,
            tags: request.tags.clone(),
            symbols: request.symbols.clone(),
        })
        .await
    }

    /// Ingest caller-supplied content. HTML is reduced to text first.
    pub async fn save_market_info(&self, input: &ManualInput) -> Result<IngestReport, CoreError> {
        let url = input
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(parse_http_url)
            .transpose()?;

        let (content, format, html_title) = match input.format {
            ContentFormat::Html => (
                self.extractor.to_markdown(&input.content),
                ContentFormat::Markdown,
                self.extractor.title(&input.content),
            ),
            format => (input.content.trim().to_string(), format, None),
        };
        if content.trim().is_empty() {
            return Err(CoreError::ValidationError("Content must not be empty".into()));
        }

        let source_name = match input.source_name.trim() {
            "" => "manual".to_string(),
            name => name.to_string(),
        };
        let title = Some(input.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .or(html_title)
            .unwrap_or_else(|| source_name.clone());

        self.intake(Draft {
            source: SourceRef {
                source_type: SourceType::Manual,
                name: source_name,
                url: url.map(|u| u.to_string()),
            },
            title,
            content,
            format,
            tags: input.tags.clone(),
            symbols: input.symbols.clone(),
        })
        .await
    }

    async fn intake(&self, draft: Draft) -> Result<IngestReport, CoreError> {
        let fingerprint = fingerprint(&draft.content);
        let source_key = draft.source.dedup_key();
        let explicit_assets = self.ensure_assets(&draft.symbols)?;

        if let Some(existing) = self.infos.find_duplicate(&source_key, &fingerprint)? {
            return self.merge_into(existing, &draft.tags, &explicit_assets);
        }

        let now = Utc::now();
        let mut tags = Vec::new();
        merge_tags(&mut tags, &draft.tags);
        let info = MarketInformation {
            id: Uuid::new_v4(),
            source: draft.source,
            title: draft.title,
            content: draft.content,
            content_format: draft.format,
            fingerprint,
            tags,
            linked_assets: explicit_assets.iter().map(|a| a.id).collect(),
            state: ProcessingState::Pending,
            attempt_of: None,
            created_at: now,
            updated_at: now,
        };

        if !self.infos.insert(&info)? {
            // Lost a race with an identical intake; merge into the winner
            return match self.infos.find_duplicate(&source_key, &info.fingerprint)? {
                Some(existing) => self.merge_into(existing, &info.tags, &explicit_assets),
                None => Err(CoreError::Database(format!(
                    "Record for {source_key} was rejected but no duplicate exists"
                ))),
            };
        }
        info!(id = %info.id, source = %source_key, "Stored market information");

        let status = self.analyze_record(info.id).await?;
        Ok(IngestReport {
            id: info.id,
            outcome: IngestOutcome::Created(status),
        })
    }

    fn merge_into(
        &self,
        mut existing: MarketInformation,
        tags: &[String],
        assets: &[AssetMeta],
    ) -> Result<IngestReport, CoreError> {
        if merge_tags(&mut existing.tags, tags) {
            self.infos.set_tags(existing.id, &existing.tags)?;
        }
        let ids: Vec<i64> = assets.iter().map(|a| a.id).collect();
        let linked = self.infos.link_assets(existing.id, &ids)?;
        debug!(id = %existing.id, new_links = linked, "Duplicate intake merged");
        Ok(IngestReport {
            id: existing.id,
            outcome: IngestOutcome::DuplicateSkipped,
        })
    }

    fn ensure_assets(&self, symbols: &[String]) -> Result<Vec<AssetMeta>, CoreError> {
        let mut assets = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol = validate_symbol(symbol)?;
            let market = match self.assets.find_by_symbol(&symbol)?.into_iter().next() {
                Some(existing) => existing.market,
                None => Market::infer(&symbol),
            };
            assets.push(self.assets.ensure(&NewAsset::stock(symbol, market))?);
        }
        Ok(assets)
    }

    // ── Analysis ────────────────────────────────────────────────────

    /// Run analysis on a PENDING record and return its resulting status.
    ///
    /// Records that are not PENDING, or already being analyzed by another
    /// task, are returned as-is.
    pub async fn analyze_record(&self, id: Uuid) -> Result<InfoStatus, CoreError> {
        let Some(_claim) = self.claim(id) else {
            debug!(id = %id, "Analysis already in flight");
            return self.status(id);
        };
        let info = self
            .infos
            .get(id)?
            .ok_or_else(|| CoreError::NotFound(format!("market information {id}")))?;
        if info.status() != InfoStatus::Pending {
            return Ok(info.status());
        }

        let request = AnalysisRequest {
            title: info.title.clone(),
            content: info
                .content
                .chars()
                .take(self.settings.max_content_chars)
                .collect(),
            known_symbols: self.assets.list()?.into_iter().map(|a| a.symbol).collect(),
        };
        let outcome = with_timeout(
            self.analyzer.analyze(&request),
            self.settings.analysis_timeout(),
            "content analysis",
        )
        .await
        .and_then(check_result);

        match outcome {
            Ok(result) => self.complete(info, result),
            Err(e) => {
                warn!(id = %id, analyzer = self.analyzer.name(), error = %e, "Analysis failed");
                if !self.infos.mark_failed(id, &e.to_string())? {
                    return self.status(id);
                }
                Ok(InfoStatus::Failed)
            }
        }
    }

    fn complete(&self, mut info: MarketInformation, result: AnalysisResult) -> Result<InfoStatus, CoreError> {
        let mut mentioned = Vec::new();
        for symbol in &result.mentioned_symbols {
            let Ok(symbol) = validate_symbol(symbol) else {
                continue;
            };
            mentioned.extend(self.assets.find_by_symbol(&symbol)?.into_iter().map(|a| a.id));
        }
        self.infos.link_assets(info.id, &mentioned)?;
        if merge_tags(&mut info.tags, &result.tags) {
            self.infos.set_tags(info.id, &info.tags)?;
        }

        let analysis = Analysis {
            summary: result.summary,
            sentiment: result.sentiment,
            sentiment_score: result.sentiment_score.clamp(-1.0, 1.0),
            importance: result.importance,
            market_impact: result.market_impact,
            processed_at: Utc::now(),
        };
        if !self.infos.mark_processed(info.id, &analysis)? {
            return self.status(info.id);
        }
        info!(
            id = %info.id,
            sentiment = analysis.sentiment.as_str(),
            importance = analysis.importance.as_str(),
            "Processed market information"
        );
        Ok(InfoStatus::Processed)
    }

    fn claim(&self, id: Uuid) -> Option<InFlight<'_>> {
        let claimed = self.in_flight.lock().insert(id);
        claimed.then(|| InFlight {
            set: &self.in_flight,
            id,
        })
    }

    fn status(&self, id: Uuid) -> Result<InfoStatus, CoreError> {
        self.infos
            .status_of(id)?
            .ok_or_else(|| CoreError::NotFound(format!("market information {id}")))
    }

    /// Analyze PENDING records left behind (e.g., by a cancelled intake).
    ///
    /// A record that can't be analyzed (deleted meanwhile, storage error) is
    /// logged and left out of the reports; the rest of the batch still runs.
    pub async fn process_pending(&self, limit: usize) -> Result<Vec<IngestReport>, CoreError> {
        let mut reports = Vec::new();
        for id in self.infos.pending_ids(limit)? {
            match self.analyze_record(id).await {
                Ok(status) => reports.push(IngestReport {
                    id,
                    outcome: IngestOutcome::Created(status),
                }),
                Err(e) => warn!(id = %id, error = %e, "Skipping pending record"),
            }
        }
        Ok(reports)
    }

    /// Retry a FAILED record as a fresh PENDING attempt linked to the original.
    pub async fn resubmit(&self, failed_id: Uuid) -> Result<IngestReport, CoreError> {
        let failed = self.get(failed_id)?;
        if failed.status() != InfoStatus::Failed {
            return Err(CoreError::ValidationError(format!(
                "Only FAILED records can be resubmitted; {failed_id} is {}",
                failed.status()
            )));
        }

        let now = Utc::now();
        let attempt = MarketInformation {
            id: Uuid::new_v4(),
            state: ProcessingState::Pending,
            attempt_of: Some(failed.id),
            created_at: now,
            updated_at: now,
            ..failed
        };
        if !self.infos.insert(&attempt)? {
            // A live record with the same content appeared since the failure
            let source_key = attempt.source.dedup_key();
            return match self.infos.find_duplicate(&source_key, &attempt.fingerprint)? {
                Some(existing) => {
                    let linked = self.assets_by_id(&attempt.linked_assets)?;
                    self.merge_into(existing, &attempt.tags, &linked)
                }
                None => Err(CoreError::Database(format!(
                    "Resubmission of {failed_id} was rejected but no duplicate exists"
                ))),
            };
        }
        info!(id = %attempt.id, attempt_of = %failed_id, "Resubmitted market information");

        let status = self.analyze_record(attempt.id).await?;
        Ok(IngestReport {
            id: attempt.id,
            outcome: IngestOutcome::Created(status),
        })
    }

    fn assets_by_id(&self, ids: &[i64]) -> Result<Vec<AssetMeta>, CoreError> {
        let mut assets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(asset) = self.assets.get(*id)? {
                assets.push(asset);
            }
        }
        Ok(assets)
    }

    // ── Queries / maintenance ───────────────────────────────────────

    pub fn get(&self, id: Uuid) -> Result<MarketInformation, CoreError> {
        self.infos
            .get(id)?
            .ok_or_else(|| CoreError::NotFound(format!("market information {id}")))
    }

    pub fn list(&self, filter: &InfoFilter) -> Result<Vec<MarketInformation>, CoreError> {
        self.infos.list(filter)
    }

    pub fn delete(&self, id: Uuid) -> Result<(), CoreError> {
        if !self.infos.delete(id)? {
            return Err(CoreError::NotFound(format!("market information {id}")));
        }
        info!(id = %id, "Deleted market information");
        Ok(())
    }

    /// Delete every record carrying `tag`; returns how many were removed.
    pub fn delete_by_tag(&self, tag: &str) -> Result<usize, CoreError> {
        let deleted = self.infos.delete_by_tag(tag)?;
        info!(tag, deleted, "Deleted market information by tag");
        Ok(deleted)
    }
}

/// Lowercased, whitespace-collapsed content. Fingerprints are taken over this.
#[must_use]
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hex SHA-256 of the normalized content.
#[must_use]
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(normalize_content(content).as_bytes()))
}

fn parse_http_url(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| CoreError::ValidationError(format!("Invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(CoreError::ValidationError(format!(
            "Unsupported URL '{raw}' (scheme '{scheme}'); only http and https pages can be crawled"
        ))),
    }
}

fn check_result(result: AnalysisResult) -> Result<AnalysisResult, CoreError> {
    if result.summary.trim().is_empty() {
        return Err(CoreError::AnalysisFailure("Analyzer returned an empty summary".into()));
    }
    if result.market_impact.trim().is_empty() {
        return Err(CoreError::AnalysisFailure("Analyzer returned no market impact".into()));
    }
    if !result.sentiment_score.is_finite() {
        return Err(CoreError::AnalysisFailure(format!(
            "Analyzer returned a non-finite sentiment score {}",
            result.sentiment_score
        )));
    }
    Ok(result)
}
