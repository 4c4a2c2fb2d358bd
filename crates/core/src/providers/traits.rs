use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::models::asset::{AssetMeta, AssetType, Market};
use crate::models::market_info::{Importance, Sentiment};
use crate::models::price::{CandleSeries, Resolution};

/// A stored symbol together with the market and type it trades as.
///
/// Adapters map this to their own ticker format (e.g., `BTC` crypto →
/// `BTC-USD` on Yahoo), so the same local symbol resolves per instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub market: Market,
    pub asset_type: AssetType,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, market: Market, asset_type: AssetType) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            market,
            asset_type,
        }
    }

    pub fn stock(symbol: impl Into<String>, market: Market) -> Self {
        Self::new(symbol, market, AssetType::Stock)
    }
}

impl From<&AssetMeta> for Instrument {
    fn from(asset: &AssetMeta) -> Self {
        Self::new(&asset.symbol, asset.market, asset.asset_type)
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} {})", self.symbol, self.market, self.asset_type)
    }
}

/// Trait abstraction for market data providers.
///
/// Each vendor (Finnhub, Yahoo Finance, Alpha Vantage) implements this trait
/// and normalizes its raw response into a [`CandleSeries`]. The synchronizer
/// and price service only ever see this trait, so tests inject fakes.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Markets this provider can serve.
    fn supported_markets(&self) -> Vec<Market>;

    /// Which asset types this provider can handle.
    fn supported_asset_types(&self) -> Vec<AssetType>;

    /// Quote-only feeds return `false` and are skipped for historical syncs.
    fn supports_candles(&self) -> bool {
        true
    }

    /// Fetch OHLCV candles for `[from_ts, to_ts)` (Unix seconds).
    ///
    /// An empty range is `Ok` with `status == NoData`, not an error.
    /// `from_ts >= to_ts` is a `ValidationError`.
    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<CandleSeries, CoreError>;

    /// Latest trade price in the market's currency.
    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64, CoreError>;
}

/// Reject an empty or inverted time window before any network call.
pub(crate) fn check_range(from_ts: i64, to_ts: i64) -> Result<(), CoreError> {
    if from_ts >= to_ts {
        return Err(CoreError::ValidationError(format!(
            "Invalid candle range: from ({from_ts}) must be before to ({to_ts})"
        )));
    }
    Ok(())
}

/// A fetched web page, reduced to markdown-ish text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub title: String,
    pub markdown: String,
}

/// Fetches a URL and extracts its readable text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError>;
}

/// Input handed to a [`ContentAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub title: String,
    pub content: String,
    /// Symbols of tracked assets, offered as hints for `mentioned_symbols`
    pub known_symbols: Vec<String>,
}

/// Structured output of a [`ContentAnalyzer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    pub sentiment: Sentiment,
    /// Clamped to `-1.0..=1.0` by the pipeline
    pub sentiment_score: f64,
    pub importance: Importance,
    pub market_impact: String,
    #[serde(default)]
    pub mentioned_symbols: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Derives summary, sentiment and related fields from content.
///
/// Any error is terminal for the record being analyzed; the pipeline marks it FAILED.
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CoreError>;
}
