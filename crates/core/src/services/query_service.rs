use chrono::{Days, Utc};
use tracing::debug;

use crate::errors::CoreError;
use crate::models::analytics::CompanyInfo;
use crate::models::asset::{validate_symbol, AssetMeta};
use crate::models::market_info::{InfoFilter, MarketInformation};
use crate::storage::asset_repository::AssetRepository;
use crate::storage::market_info_repository::MarketInfoRepository;
use crate::storage::price_repository::PriceRepository;

/// Maximum number of assets listed by [`QueryService::query_asset_info`].
const MAX_ASSET_MATCHES: usize = 10;

/// Default number of information items returned per symbol.
const DEFAULT_INFO_LIMIT: usize = 20;

/// Read-only lookups exposed to the assistant as tools.
#[derive(Debug, Clone)]
pub struct QueryService {
    assets: AssetRepository,
    prices: PriceRepository,
    infos: MarketInfoRepository,
}

impl QueryService {
    pub fn new(assets: AssetRepository, prices: PriceRepository, infos: MarketInfoRepository) -> Self {
        Self {
            assets,
            prices,
            infos,
        }
    }

    /// Human-readable summary of tracked assets matching `query`
    /// (symbol prefix or name substring).
    pub fn query_asset_info(&self, query: &str) -> Result<String, CoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CoreError::ValidationError("Query must not be empty".into()));
        }
        let matches = self.assets.search(query, MAX_ASSET_MATCHES)?;
        if matches.is_empty() {
            return Ok(format!("No tracked assets match '{query}'."));
        }

        let mut out = format!("Found {} asset(s) matching '{query}':\n", matches.len());
        for asset in &matches {
            let latest = self.prices.latest(&asset.symbol)?;
            out.push_str(&format!(
                "- {} ({}, {}) {}",
                asset.symbol, asset.market, asset.asset_type, asset.name
            ));
            let price = match (latest, asset.latest_price) {
                (Some(point), _) => format!(
                    ": last close {:.2} {} on {}",
                    point.close,
                    asset.market.currency(),
                    point.date
                ),
                (None, Some(price)) => format!(": last price {price:.2} {}", asset.market.currency()),
                (None, None) => ": no price data".to_string(),
            };
            out.push_str(&price);
            out.push('\n');
        }
        Ok(out)
    }

    /// Information linked to `symbol`, newest first.
    pub fn query_market_info(&self, symbol: &str) -> Result<Vec<MarketInformation>, CoreError> {
        let symbol = validate_symbol(symbol)?;
        self.infos.list(&InfoFilter {
            symbol: Some(symbol),
            limit: Some(DEFAULT_INFO_LIMIT),
            ..InfoFilter::default()
        })
    }

    /// Profile of a tracked asset: latest close, 52-week range from stored
    /// prices, and sentiment over its processed information.
    pub fn query_company_info(&self, symbol: &str) -> Result<CompanyInfo, CoreError> {
        let symbol = validate_symbol(symbol)?;
        let asset = self.primary_listing(&symbol)?;

        let latest = self.prices.latest(&symbol)?;
        let today = Utc::now().date_naive();
        let year_ago = today.checked_sub_days(Days::new(365)).unwrap_or(today);
        let range = self.prices.high_low(&symbol, year_ago, today)?;
        let (processed_info_count, average_sentiment) = self.infos.sentiment_stats(asset.id)?;
        let stored_price_points = self.prices.count(&symbol)?;
        debug!(symbol = %symbol, points = stored_price_points, "Built company info");

        Ok(CompanyInfo {
            last_close: latest
                .as_ref()
                .map(|p| p.close)
                .or(asset.latest_price),
            last_close_date: latest.map(|p| p.date),
            high_52w: range.map(|(high, _)| high),
            low_52w: range.map(|(_, low)| low),
            stored_price_points,
            processed_info_count,
            average_sentiment,
            asset,
        })
    }

    /// First listing of a symbol, by market code.
    fn primary_listing(&self, symbol: &str) -> Result<AssetMeta, CoreError> {
        self.assets
            .find_by_symbol(symbol)?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::NotFound(format!("asset {symbol}")))
    }
}
