use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::CoreError;
use crate::models::asset::{AssetType, Market};
use crate::models::price::{CandleSeries, Resolution};

use super::traits::{Instrument, MarketDataProvider};
use super::{check_status, http_client, tag_error};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "Alpha Vantage";

/// Alpha Vantage API provider, used as a quote-only fallback for US listings.
///
/// - **Free tier**: 25 requests/day (across ALL endpoints).
/// - **Requires**: API key (set via settings as "alphavantage").
/// - **Strategy**: `GLOBAL_QUOTE` only; historical candles come from other feeds.
///
/// Throttling is reported in-band through `"Note"`/`"Information"` fields on
/// an HTTP 200, which this adapter maps to `RateLimited`.
pub struct AlphaVantageProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AlphaVantageProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(Duration::from_secs(30)),
            api_key,
        }
    }

    /// Extract the price from a raw `GLOBAL_QUOTE` body.
    pub fn parse_quote_response(symbol: &str, body: &str) -> Result<f64, CoreError> {
        let resp: GlobalQuoteResponse = serde_json::from_str(body).map_err(|e| {
            CoreError::provider(PROVIDER, format!("Failed to parse quote for {symbol}: {e}"))
        })?;

        if resp.note.is_some() || resp.information.is_some() {
            return Err(CoreError::RateLimited {
                provider: PROVIDER.into(),
                retry_after_secs: Some(60),
            });
        }
        if let Some(message) = resp.error_message {
            return Err(CoreError::provider(PROVIDER, message));
        }

        let price_str = resp
            .global_quote
            .and_then(|q| q.price)
            .ok_or_else(|| CoreError::NotFound(format!("No Alpha Vantage quote for {symbol}")))?;

        price_str.trim().parse().map_err(|e| {
            CoreError::provider(PROVIDER, format!("Invalid price format for {symbol}: {e}"))
        })
    }
}

// ── Alpha Vantage API response types ────────────────────────────────

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn supported_markets(&self) -> Vec<Market> {
        vec![Market::US]
    }

    fn supported_asset_types(&self) -> Vec<AssetType> {
        vec![AssetType::Stock, AssetType::Etf]
    }

    fn supports_candles(&self) -> bool {
        false
    }

    async fn fetch_candles(
        &self,
        instrument: &Instrument,
        _resolution: Resolution,
        _from_ts: i64,
        _to_ts: i64,
    ) -> Result<CandleSeries, CoreError> {
        Err(CoreError::NoProvider(format!(
            "{PROVIDER} is quote-only; no candles for {instrument}"
        )))
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<f64, CoreError> {
        let symbol = instrument.symbol.as_str();
        let response = self
            .client
            .get(BASE_URL)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", &symbol.to_uppercase()),
                ("apikey", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;

        let body = check_status(PROVIDER, response)?
            .text()
            .await
            .map_err(|e| tag_error(PROVIDER, e))?;

        Self::parse_quote_response(symbol, &body)
    }
}
