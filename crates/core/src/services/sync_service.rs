use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::errors::CoreError;
use crate::models::asset::{validate_symbol, AssetType, Market, NewAsset};
use crate::models::price::{CandleSeries, CandleStatus, PricePoint, Resolution, SyncReport, SyncStatus};
use crate::models::settings::SyncSettings;
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::{Instrument, MarketDataProvider};
use crate::storage::asset_repository::AssetRepository;
use crate::storage::price_repository::PriceRepository;

use super::retry::with_timeout_retry;

/// What to do when a sync for the same symbol is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Queue behind the running sync
    #[default]
    Wait,
    /// Fail fast with `SyncInProgress`
    Reject,
}

/// One historical sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub symbol: String,
    pub market: Market,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl SyncRequest {
    pub fn new(symbol: impl Into<String>, market: Market, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            from,
            to,
        }
    }
}

type SymbolLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a symbol's sync lock entry; removes it from the map on drop when
/// no other sync is running or queued for the symbol.
struct SymbolLease<'a> {
    locks: &'a SymbolLocks,
    symbol: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SymbolLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // One reference in the map, one here
        let idle = locks
            .get(&self.symbol)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.symbol);
        }
    }
}

/// Pulls daily candles from providers into the price store.
///
/// Writes for one symbol are serialized by a per-symbol async lock;
/// different symbols sync concurrently. Every executed request leaves a
/// [`SyncRun`](crate::models::price::SyncRun) behind, successful or not.
pub struct SyncService {
    registry: ProviderRegistry,
    prices: PriceRepository,
    assets: AssetRepository,
    settings: SyncSettings,
    guards: SymbolLocks,
}

impl SyncService {
    pub fn new(
        registry: ProviderRegistry,
        prices: PriceRepository,
        assets: AssetRepository,
        settings: SyncSettings,
    ) -> Self {
        Self {
            registry,
            prices,
            assets,
            settings,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Sync `[from, to]` (inclusive calendar dates), waiting behind any
    /// running sync of the same symbol.
    pub async fn sync_historical_data(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        market: Market,
    ) -> Result<SyncReport, CoreError> {
        self.sync(&SyncRequest::new(symbol, market, from, to), SyncMode::Wait)
            .await
    }

    /// Sync one request under the given concurrency mode.
    pub async fn sync(&self, request: &SyncRequest, mode: SyncMode) -> Result<SyncReport, CoreError> {
        let symbol = validate_symbol(&request.symbol)?;
        if request.from > request.to {
            return Err(CoreError::ValidationError(format!(
                "Sync range start {} is after end {}",
                request.from, request.to
            )));
        }
        let (from_ts, to_ts) = self.window(request.from, request.to)?;

        // `_guard` drops before `lease`, releasing its reference first
        let lease = self.lease(&symbol);
        let _guard = match mode {
            SyncMode::Wait => Arc::clone(&lease.lock).lock_owned().await,
            SyncMode::Reject => Arc::clone(&lease.lock)
                .try_lock_owned()
                .map_err(|_| CoreError::SyncInProgress(symbol.clone()))?,
        };

        let asset_type = self
            .assets
            .find(&symbol, request.market)?
            .map_or(AssetType::Stock, |a| a.asset_type);

        let mut report = SyncReport {
            symbol: symbol.clone(),
            market: request.market,
            from: request.from,
            to: request.to,
            provider: None,
            status: SyncStatus::Failed,
            fetched: 0,
            written: 0,
            failed_rows: 0,
            new_rows: 0,
        };

        let instrument = Instrument::new(&symbol, request.market, asset_type);
        let (provider, series) = match self.fetch_with_fallback(&instrument, from_ts, to_ts).await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Historical sync failed");
                self.record(&report, Some(e.to_string().as_str()));
                return Err(e);
            }
        };
        report.provider = Some(provider);

        let before = self.prices.count(&symbol)?;
        let points = self.points_in_range(&symbol, &series, request.from, request.to)?;
        report.fetched = points.len();

        for point in &points {
            match self.prices.upsert(point) {
                Ok(()) => report.written += 1,
                Err(e) => {
                    warn!(symbol = %symbol, date = %point.date, error = %e, "Rejected price point");
                    report.failed_rows += 1;
                }
            }
        }
        report.new_rows = self.prices.count(&symbol)?.saturating_sub(before);

        report.status = if series.status == CandleStatus::NoData || points.is_empty() {
            SyncStatus::NoData
        } else if report.failed_rows > 0 {
            SyncStatus::PartiallyFailed
        } else {
            SyncStatus::Succeeded
        };

        let asset = self
            .assets
            .ensure(&NewAsset::new(&symbol, request.market, asset_type, &symbol))?;
        if let Some(newest) = self.prices.latest(&symbol)? {
            if let Some(at) = midnight_utc(newest.date, self.offset()?) {
                self.assets.update_latest_price(asset.id, newest.close, at)?;
            }
        }

        self.record(&report, None);
        info!(
            symbol = %symbol,
            provider = ?report.provider,
            status = report.status.as_str(),
            fetched = report.fetched,
            written = report.written,
            new_rows = report.new_rows,
            "Historical sync finished"
        );
        Ok(report)
    }

    /// Run several requests concurrently; one result per request, in order.
    pub async fn sync_many(
        self: &Arc<Self>,
        requests: Vec<SyncRequest>,
        mode: SyncMode,
    ) -> Vec<Result<SyncReport, CoreError>> {
        let mut tasks = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let service = Arc::clone(self);
            tasks.spawn(async move { (index, service.sync(&request, mode).await) });
        }

        let mut results: Vec<Option<Result<SyncReport, CoreError>>> = Vec::new();
        results.resize_with(tasks.len(), || None);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Sync task aborted"),
            }
        }
        results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(CoreError::Config("Sync task did not complete".into())))
            })
            .collect()
    }

    /// Symbols with a sync currently running or queued.
    #[must_use]
    pub fn active_symbols(&self) -> usize {
        self.guards.lock().len()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn lease(&self, symbol: &str) -> SymbolLease<'_> {
        let lock = Arc::clone(self.guards.lock().entry(symbol.to_string()).or_default());
        SymbolLease {
            locks: &self.guards,
            symbol: symbol.to_string(),
            lock,
        }
    }

    fn offset(&self) -> Result<FixedOffset, CoreError> {
        FixedOffset::east_opt(self.settings.utc_offset_minutes * 60).ok_or_else(|| {
            CoreError::Config(format!(
                "Invalid market UTC offset {} minutes",
                self.settings.utc_offset_minutes
            ))
        })
    }

    /// `[from 00:00, to + 1 day 00:00)` in the market offset, as Unix seconds.
    fn window(&self, from: NaiveDate, to: NaiveDate) -> Result<(i64, i64), CoreError> {
        let offset = self.offset()?;
        let end = to
            .checked_add_days(Days::new(1))
            .ok_or_else(|| CoreError::ValidationError(format!("Sync end date {to} is out of range")))?;
        let start = midnight_utc(from, offset)
            .ok_or_else(|| CoreError::ValidationError(format!("Invalid sync start {from}")))?;
        let end = midnight_utc(end, offset)
            .ok_or_else(|| CoreError::ValidationError(format!("Invalid sync end {to}")))?;
        Ok((start.timestamp(), end.timestamp()))
    }

    async fn fetch_with_fallback(
        &self,
        instrument: &Instrument,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<(String, CandleSeries), CoreError> {
        let providers = self
            .registry
            .candle_providers_for(instrument.market, instrument.asset_type);
        if providers.is_empty() {
            return Err(CoreError::NoProvider(format!(
                "{} {} candles",
                instrument.market, instrument.asset_type
            )));
        }
        let symbol = instrument.symbol.as_str();

        let mut last_error = None;
        for provider in &providers {
            let adapter: &dyn MarketDataProvider = provider.as_ref();
            let operation = format!("{} candles for {symbol}", adapter.name());
            let result = with_timeout_retry(
                move || adapter.fetch_candles(instrument, Resolution::Daily, from_ts, to_ts),
                &self.settings,
                &operation,
            )
            .await
            .and_then(|series| {
                series.validate(adapter.name())?;
                Ok(series)
            });

            match result {
                Ok(series) => {
                    debug!(provider = adapter.name(), symbol, candles = series.len(), "Fetched candles");
                    return Ok((adapter.name().to_string(), series));
                }
                Err(e) => {
                    warn!(provider = adapter.name(), symbol, error = %e, "Candle fetch failed, trying next provider");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CoreError::NoProvider(symbol.to_string())))
    }

    /// Truncate candle timestamps to local calendar dates and keep `[from, to]`.
    fn points_in_range(
        &self,
        symbol: &str,
        series: &CandleSeries,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, CoreError> {
        let offset = self.offset()?;
        let mut points: Vec<PricePoint> = Vec::with_capacity(series.len());
        for candle in series.candles() {
            let Some(utc) = DateTime::<Utc>::from_timestamp(candle.timestamp, 0) else {
                warn!(symbol, timestamp = candle.timestamp, "Skipping candle with invalid timestamp");
                continue;
            };
            let date = utc.with_timezone(&offset).date_naive();
            if date < from || date > to {
                continue;
            }
            let point = PricePoint {
                symbol: symbol.to_string(),
                date,
                open: candle.open,
                high: candle.high,
                low: candle.low,
                close: candle.close,
                volume: candle.volume,
            };
            // Two candles on one local date: the later one wins
            match points.last_mut() {
                Some(last) if last.date == date => *last = point,
                _ => points.push(point),
            }
        }
        Ok(points)
    }

    fn record(&self, report: &SyncReport, error: Option<&str>) {
        if let Err(e) = self.prices.record_sync_run(report, error) {
            warn!(symbol = %report.symbol, error = %e, "Failed to record sync run");
        }
    }
}

fn midnight_utc(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let local = date.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
