use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::CoreError;
use crate::models::asset::{AssetType, Market};
use crate::models::price::{Candle, CandleSeries, Resolution};

use super::traits::{check_range, Instrument, MarketDataProvider};
use super::{check_status, http_client, tag_error};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER: &str = "Finnhub";

/// Finnhub API provider for US equities.
///
/// - **Requires**: API key (set via settings as "finnhub").
/// - **Free tier**: 60 requests/minute; HTTP 429 beyond that.
/// - **Coverage**: US stocks, ETFs and funds; daily/weekly/monthly candles.
///
/// Candle responses are column-oriented (`c,h,l,o,t,v` arrays plus a status
/// `s` of `"ok"` or `"no_data"`), which maps directly onto [`CandleSeries`].
pub struct FinnhubProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FinnhubProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(30)),
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different host (proxies, sandboxes).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Normalize a raw `/stock/candle` body into a validated [`CandleSeries`].
    pub fn parse_candle_response(body: &str) -> Result<CandleSeries, CoreError> {
        let raw: CandleResponse = serde_json::from_str(body).map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to parse candle response: {e}"))
        })?;
        raw.into_series()
    }
}

// ── Finnhub API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct CandleResponse {
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    t: Vec<i64>,
    /// Some instruments report fractional volume
    #[serde(default)]
    v: Vec<f64>,
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl CandleResponse {
    fn into_series(self) -> Result<CandleSeries, CoreError> {
        if let Some(error) = self.error {
            return Err(classify_error_message(&error));
        }
        match self.s.as_deref() {
            Some("no_data") => return Ok(CandleSeries::no_data()),
            Some("ok") => {}
            other => {
                return Err(CoreError::provider(
                    PROVIDER,
                    format!("Unexpected candle status {other:?}"),
                ))
            }
        }

        let n = self.t.len();
        if [self.o.len(), self.h.len(), self.l.len(), self.c.len(), self.v.len()]
            .iter()
            .any(|&len| len != n)
        {
            return Err(CoreError::provider(
                PROVIDER,
                format!("Malformed candle response: array lengths differ from {n} timestamps"),
            ));
        }

        let candles = (0..n)
            .map(|i| Candle {
                timestamp: self.t[i],
                open: self.o[i],
                high: self.h[i],
                low: self.l[i],
                close: self.c[i],
                volume: self.v[i].round() as i64,
            })
            .collect();
        let series = CandleSeries::from_candles(candles);
        series.validate(PROVIDER)?;
        Ok(series)
    }
}

#[derive(Deserialize)]
struct QuoteResponse {
    /// Current price; 0 for unknown symbols
    #[serde(default)]
    c: f64,
    #[serde(default)]
    error: Option<String>,
}

fn classify_error_message(message: &str) -> CoreError {
    let lower = message.to_lowercase();
    if lower.contains("limit") {
        CoreError::RateLimited {
            provider: PROVIDER.into(),
            retry_after_secs: None,
        }
    } else {
        CoreError::provider(PROVIDER, message.to_string())
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supported_markets(&self) -> Vec<Market> {
        vec![Market::US]
    }

    fn supported_asset_types(&self) -> Vec<AssetType> {
        vec![AssetType::Stock, AssetType::Etf, AssetType::Fund]
    }

    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<CandleSeries, CoreError> {
        check_range(from_ts, to_ts)?;
        let symbol = instrument.symbol.as_str();
        debug!(symbol, from_ts, to_ts, "Finnhub candle request");

        // Finnhub's `to` is inclusive; the trait's range is half-open.
        let response = self
            .client
            .get(format!("{}/stock/candle", self.base_url))
            .query(&[
                ("symbol", symbol.to_uppercase()),
                ("resolution", resolution.code().to_string()),
                ("from", from_ts.to_string()),
                ("to", (to_ts - 1).to_string()),
                ("token", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;

        let body = check_status(PROVIDER, response)?
            .text()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;

        let series = Self::parse_candle_response(&body)?;
        // Drop anything the provider returned outside the window.
        let candles: Vec<Candle> = series
            .candles()
            .filter(|c| c.timestamp >= from_ts && c.timestamp < to_ts)
            .collect();
        Ok(CandleSeries::from_candles(candles))
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64, CoreError> {
        let symbol = instrument.symbol.as_str();
        let response = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[("symbol", symbol.to_uppercase()), ("token", self.api_key.clone())])
            .send()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;

        let quote: QuoteResponse = check_status(PROVIDER, response)?
            .json()
            .await
            .map_err(|e| {
                CoreError::provider(PROVIDER, format!("Failed to parse quote for {symbol}: {e}"))
            })?;

        if let Some(error) = quote.error {
            return Err(classify_error_message(&error));
        }
        if quote.c <= 0.0 {
            return Err(CoreError::NotFound(format!("No Finnhub quote for {symbol}")));
        }
        Ok(quote.c)
    }
}
