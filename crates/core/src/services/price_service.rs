use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::asset::{AssetMeta, AssetType, Market};
use crate::providers::registry::ProviderRegistry;
use crate::providers::traits::Instrument;
use crate::storage::account_repository::AccountRepository;
use crate::storage::asset_repository::AssetRepository;
use crate::storage::price_repository::PriceRepository;

/// Where a refreshed price came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceSource {
    /// Live quote from the named provider
    Live(String),
    /// Close of the most recent stored price point
    StoredClose,
}

/// Result of refreshing one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub symbol: String,
    pub market: Market,
    pub price: f64,
    pub source: PriceSource,
}

/// Refreshes the cached latest price of assets and the `current_price` of
/// positions holding them.
///
/// Live quotes are tried in registry order. When every provider fails, the
/// close of the newest stored price point is used instead, so an offline
/// refresh still reflects the last sync.
pub struct PriceService {
    registry: ProviderRegistry,
    assets: AssetRepository,
    prices: PriceRepository,
    accounts: AccountRepository,
}

impl PriceService {
    pub fn new(
        registry: ProviderRegistry,
        assets: AssetRepository,
        prices: PriceRepository,
        accounts: AccountRepository,
    ) -> Self {
        Self {
            registry,
            assets,
            prices,
            accounts,
        }
    }

    /// Check if at least one provider serves `(market, asset_type)`.
    pub fn has_provider_for(&self, market: Market, asset_type: AssetType) -> bool {
        !self.registry.providers_for(market, asset_type).is_empty()
    }

    /// Names of the providers serving `(market, asset_type)`, in priority order.
    pub fn get_provider_names(&self, market: Market, asset_type: AssetType) -> Vec<String> {
        self.registry
            .providers_for(market, asset_type)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Live quote with automatic fallback across providers.
    pub async fn fetch_quote(&self, asset: &AssetMeta) -> Result<(f64, String), CoreError> {
        let providers = self.registry.providers_for(asset.market, asset.asset_type);
        if providers.is_empty() {
            return Err(CoreError::NoProvider(format!(
                "{} quotes ({})",
                asset.market, asset.asset_type
            )));
        }

        let instrument = Instrument::from(asset);
        let mut last_error = None;
        for provider in &providers {
            match provider.fetch_quote(&instrument).await {
                Ok(price) if price.is_finite() && price > 0.0 => {
                    return Ok((price, provider.name().to_string()));
                }
                Ok(price) => {
                    warn!(provider = provider.name(), symbol = %asset.symbol, price, "Discarding invalid quote");
                    last_error = Some(CoreError::provider(
                        provider.name(),
                        format!("Invalid quote {price} for {}", asset.symbol),
                    ));
                }
                Err(e) => {
                    debug!(provider = provider.name(), symbol = %asset.symbol, error = %e, "Quote failed, trying next provider");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::NoProvider(asset.symbol.clone())))
    }

    /// Refresh one asset: live quote, else stored close.
    pub async fn refresh_asset(&self, asset: &AssetMeta) -> Result<PriceUpdate, CoreError> {
        let (price, source, observed_at) = match self.fetch_quote(asset).await {
            Ok((price, provider)) => (price, PriceSource::Live(provider), Utc::now()),
            Err(live_error) => {
                let point = self.prices.latest(&asset.symbol)?.ok_or_else(|| {
                    warn!(symbol = %asset.symbol, error = %live_error, "No live quote and no stored prices");
                    live_error
                })?;
                let observed_at: DateTime<Utc> = point
                    .date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .unwrap_or_else(Utc::now);
                (point.close, PriceSource::StoredClose, observed_at)
            }
        };

        self.assets.update_latest_price(asset.id, price, observed_at)?;
        let touched = self.accounts.update_position_prices(asset.id, price)?;
        debug!(symbol = %asset.symbol, price, positions = touched, "Refreshed price");

        Ok(PriceUpdate {
            symbol: asset.symbol.clone(),
            market: asset.market,
            price,
            source,
        })
    }

    /// Refresh every asset held by an account.
    ///
    /// Assets whose price can't be determined are skipped with a warning;
    /// the rest are still updated.
    pub async fn refresh_prices(&self, account_id: Uuid) -> Result<Vec<PriceUpdate>, CoreError> {
        self.accounts.require_account(account_id)?;
        let positions = self.accounts.positions(account_id)?;

        let mut seen = HashSet::new();
        let mut updates = Vec::with_capacity(positions.len());
        for position in positions {
            if !seen.insert((position.symbol.clone(), position.market)) {
                continue;
            }
            let Some(asset) = self.assets.find(&position.symbol, position.market)? else {
                continue;
            };
            match self.refresh_asset(&asset).await {
                Ok(update) => updates.push(update),
                Err(e) => warn!(symbol = %asset.symbol, error = %e, "Skipping price refresh"),
            }
        }

        info!(account = %account_id, refreshed = updates.len(), "Refreshed account prices");
        Ok(updates)
    }
}
