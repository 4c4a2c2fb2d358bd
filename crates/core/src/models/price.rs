use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

use super::asset::Market;

/// One stored OHLCV observation for a symbol on a calendar date.
/// Unique per `(symbol, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Candle bucket size requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Daily,
    Weekly,
    Monthly,
}

impl Resolution {
    /// Provider code used by Finnhub-style candle endpoints.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Resolution::Daily => "D",
            Resolution::Weekly => "W",
            Resolution::Monthly => "M",
        }
    }

    /// Interval string used by Yahoo's chart endpoint.
    #[must_use]
    pub fn yahoo_interval(&self) -> &'static str {
        match self {
            Resolution::Daily => "1d",
            Resolution::Weekly => "1wk",
            Resolution::Monthly => "1mo",
        }
    }
}

/// Whether a provider had observations for the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleStatus {
    Ok,
    NoData,
}

/// A single normalized candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Unix seconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Normalized provider output for a candle request.
///
/// Column-oriented, one entry per timestamp in every array. Adapters must
/// return a series that passes [`CandleSeries::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<i64>,
    pub timestamps: Vec<i64>,
    pub status: CandleStatus,
}

impl CandleSeries {
    /// An empty "no observations" result.
    #[must_use]
    pub fn no_data() -> Self {
        Self {
            opens: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
            closes: Vec::new(),
            volumes: Vec::new(),
            timestamps: Vec::new(),
            status: CandleStatus::NoData,
        }
    }

    /// Build a series from row-oriented candles, sorting them by timestamp.
    /// An empty input yields [`CandleSeries::no_data`].
    #[must_use]
    pub fn from_candles(mut candles: Vec<Candle>) -> Self {
        if candles.is_empty() {
            return Self::no_data();
        }
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);

        let mut series = Self {
            opens: Vec::with_capacity(candles.len()),
            highs: Vec::with_capacity(candles.len()),
            lows: Vec::with_capacity(candles.len()),
            closes: Vec::with_capacity(candles.len()),
            volumes: Vec::with_capacity(candles.len()),
            timestamps: Vec::with_capacity(candles.len()),
            status: CandleStatus::Ok,
        };
        for c in candles {
            series.timestamps.push(c.timestamp);
            series.opens.push(c.open);
            series.highs.push(c.high);
            series.lows.push(c.low);
            series.closes.push(c.close);
            series.volumes.push(c.volume);
        }
        series
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Check the shape contract: equal-length arrays, strictly ascending
    /// timestamps, and a status consistent with the contents.
    pub fn validate(&self, provider: &str) -> Result<(), CoreError> {
        let n = self.timestamps.len();
        let lengths = [
            self.opens.len(),
            self.highs.len(),
            self.lows.len(),
            self.closes.len(),
            self.volumes.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(CoreError::provider(
                provider,
                format!("Malformed candle response: field lengths {lengths:?} vs {n} timestamps"),
            ));
        }
        if self.timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::provider(
                provider,
                "Malformed candle response: timestamps are not strictly ascending",
            ));
        }
        match (self.status, n) {
            (CandleStatus::Ok, 0) => Err(CoreError::provider(
                provider,
                "Malformed candle response: status ok with no candles",
            )),
            (CandleStatus::NoData, len) if len > 0 => Err(CoreError::provider(
                provider,
                "Malformed candle response: status no_data with candles present",
            )),
            _ => Ok(()),
        }
    }

    /// Iterate row-oriented candles.
    pub fn candles(&self) -> impl Iterator<Item = Candle> + '_ {
        (0..self.len()).map(move |i| Candle {
            timestamp: self.timestamps[i],
            open: self.opens[i],
            high: self.highs[i],
            low: self.lows[i],
            close: self.closes[i],
            volume: self.volumes[i],
        })
    }
}

/// Outcome of one synchronizer run, also persisted as sync history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Every fetched candle was written
    Succeeded,
    /// Some rows failed to upsert; the rest were written
    PartiallyFailed,
    /// The provider had no observations for the range
    NoData,
    /// The provider call failed; nothing was written
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Succeeded => "SUCCEEDED",
            SyncStatus::PartiallyFailed => "PARTIALLY_FAILED",
            SyncStatus::NoData => "NO_DATA",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "SUCCEEDED" => Ok(SyncStatus::Succeeded),
            "PARTIALLY_FAILED" => Ok(SyncStatus::PartiallyFailed),
            "NO_DATA" => Ok(SyncStatus::NoData),
            "FAILED" => Ok(SyncStatus::Failed),
            other => Err(CoreError::Deserialization(format!(
                "Unknown sync status '{other}'"
            ))),
        }
    }
}

/// Result returned to the caller of a historical sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub symbol: String,
    pub market: Market,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Provider that served the candles, if any did
    pub provider: Option<String>,
    pub status: SyncStatus,
    /// Candles returned by the provider inside the requested range
    pub fetched: usize,
    /// Rows upserted successfully
    pub written: usize,
    /// Rows rejected by the repository
    pub failed_rows: usize,
    /// Net increase in stored rows for the symbol (0 on an idempotent re-run)
    pub new_rows: usize,
}

/// Persisted history entry for a sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub symbol: String,
    pub market: Market,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub status: SyncStatus,
    pub provider: Option<String>,
    pub rows_written: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}
