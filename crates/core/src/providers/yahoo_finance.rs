use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use crate::errors::CoreError;
use crate::models::asset::{AssetType, Market};
use crate::models::price::{Candle, CandleSeries, Resolution};

use super::traits::{check_range, Instrument, MarketDataProvider};

const PROVIDER: &str = "Yahoo Finance";

/// Yahoo Finance provider for regional exchanges, US listings and crypto.
///
/// - **Free**: No API key required.
/// - **No strict rate limits** (unofficial public API).
/// - **Coverage**: Shanghai/Shenzhen, Hong Kong, US, and `<COIN>-USD` pairs.
///
/// Uses the `yahoo_finance_api` crate. Local symbols are mapped to Yahoo
/// tickers by [`YahooFinanceProvider::yahoo_symbol`].
pub struct YahooFinanceProvider {
    connector: yahoo_finance_api::YahooConnector,
}

impl YahooFinanceProvider {
    pub fn new() -> Result<Self, CoreError> {
        let connector = yahoo_finance_api::YahooConnector::new().map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to create connector: {e}"))
        })?;
        Ok(Self { connector })
    }

    /// Map a local symbol to a Yahoo ticker.
    ///
    /// - CN: `600519` → `600519.SS` (Shanghai: codes starting 5/6/9),
    ///   `000001` → `000001.SZ` (Shenzhen: everything else)
    /// - HK: `700` → `0700.HK` (zero-padded to four digits)
    /// - Crypto: `BTC` → `BTC-USD`
    /// - US: unchanged
    ///
    /// Symbols that already carry an exchange suffix are passed through.
    #[must_use]
    pub fn yahoo_symbol(symbol: &str, market: Market, asset_type: AssetType) -> String {
        let symbol = symbol.trim().to_uppercase();
        if symbol.contains('.') || symbol.contains('-') || symbol.starts_with('^') {
            return symbol;
        }
        if asset_type == AssetType::Crypto {
            return format!("{symbol}-USD");
        }
        match market {
            Market::US => symbol,
            Market::CN => {
                let suffix = match symbol.chars().next() {
                    Some('5' | '6' | '9') => "SS",
                    _ => "SZ",
                };
                format!("{symbol}.{suffix}")
            }
            Market::HK => {
                let digits = symbol.trim_start_matches('0');
                format!("{digits:0>4}.HK")
            }
        }
    }

    /// Yahoo ticker for an instrument, using its own market and asset type.
    #[must_use]
    pub fn ticker_for(instrument: &Instrument) -> String {
        Self::yahoo_symbol(&instrument.symbol, instrument.market, instrument.asset_type)
    }

    fn to_offset_datetime(ts: i64) -> Result<OffsetDateTime, CoreError> {
        OffsetDateTime::from_unix_timestamp(ts).map_err(|e| {
            CoreError::ValidationError(format!("Timestamp {ts} out of range: {e}"))
        })
    }

    fn map_error(symbol: &str, error: &yahoo_finance_api::YahooError) -> Result<CandleSeries, CoreError> {
        let message = error.to_string();
        let lower = message.to_lowercase();
        if lower.contains("empty") || lower.contains("no quote") || lower.contains("no data") {
            debug!(symbol, "Yahoo returned no data for range");
            return Ok(CandleSeries::no_data());
        }
        if lower.contains("429") || lower.contains("too many") {
            return Err(CoreError::RateLimited {
                provider: PROVIDER.into(),
                retry_after_secs: None,
            });
        }
        Err(CoreError::provider(
            PROVIDER,
            format!("Failed to fetch history for {symbol}: {message}"),
        ))
    }
}

#[async_trait]
impl MarketDataProvider for YahooFinanceProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supported_markets(&self) -> Vec<Market> {
        vec![Market::CN, Market::HK, Market::US]
    }

    fn supported_asset_types(&self) -> Vec<AssetType> {
        vec![AssetType::Stock, AssetType::Etf, AssetType::Fund, AssetType::Crypto]
    }

    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<CandleSeries, CoreError> {
        check_range(from_ts, to_ts)?;
        let start = Self::to_offset_datetime(from_ts)?;
        let end = Self::to_offset_datetime(to_ts)?;
        let ticker = Self::ticker_for(instrument);
        debug!(instrument = %instrument, ticker = %ticker, "Yahoo candle request");

        let resp = match self
            .connector
            .get_quote_history_interval(&ticker, start, end, resolution.yahoo_interval())
            .await
        {
            Ok(resp) => resp,
            Err(e) => return Self::map_error(&ticker, &e),
        };
        let quotes = match resp.quotes() {
            Ok(quotes) => quotes,
            Err(e) => return Self::map_error(&ticker, &e),
        };

        let candles: Vec<Candle> = quotes
            .iter()
            .filter(|q| q.timestamp >= from_ts && q.timestamp < to_ts)
            .map(|q| Candle {
                timestamp: q.timestamp,
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.close,
                volume: i64::try_from(q.volume).unwrap_or(i64::MAX),
            })
            .collect();

        let series = CandleSeries::from_candles(candles);
        series.validate(PROVIDER)?;
        Ok(series)
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64, CoreError> {
        let ticker = Self::ticker_for(instrument);
        let resp = self
            .connector
            .get_latest_quotes(&ticker, "1d")
            .await
            .map_err(|e| {
                CoreError::provider(PROVIDER, format!("Failed to fetch latest quote for {ticker}: {e}"))
            })?;

        let quote = resp.last_quote().map_err(|e| {
            CoreError::provider(PROVIDER, format!("No quote data for {ticker}: {e}"))
        })?;

        Ok(quote.close)
    }
}
