use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::asset::{AssetType, Market};

use super::alphavantage::AlphaVantageProvider;
use super::finnhub::FinnhubProvider;
use super::traits::MarketDataProvider;
use super::yahoo_finance::YahooFinanceProvider;

/// Registry of all available market data providers.
///
/// Routes requests by `(Market, AssetType)`. Registration order is priority
/// order: callers try the first match and fall back to the next on failure.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MarketDataProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Create a registry with all default providers pre-configured.
    pub fn new_with_defaults(api_keys: &HashMap<String, String>) -> Self {
        let mut registry = Self::new();

        // Finnhub: US candles and quotes, requires API key (primary for US)
        match api_keys.get("finnhub") {
            Some(key) => registry.register(Arc::new(FinnhubProvider::new(key.clone()))),
            None => debug!("No finnhub API key configured; skipping Finnhub"),
        }

        // Yahoo Finance: CN/HK/US/crypto, no API key needed
        match YahooFinanceProvider::new() {
            Ok(yahoo) => registry.register(Arc::new(yahoo)),
            Err(e) => warn!(error = %e, "Yahoo Finance provider unavailable"),
        }

        // Alpha Vantage: US quotes only, requires API key (fallback)
        if let Some(key) = api_keys.get("alphavantage") {
            registry.register(Arc::new(AlphaVantageProvider::new(key.clone())));
        }

        registry
    }

    /// Register a new provider at the lowest priority.
    pub fn register(&mut self, provider: Arc<dyn MarketDataProvider>) {
        self.providers.push(provider);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All providers serving `(market, asset_type)`, in priority order.
    pub fn providers_for(
        &self,
        market: Market,
        asset_type: AssetType,
    ) -> Vec<Arc<dyn MarketDataProvider>> {
        self.providers
            .iter()
            .filter(|p| {
                p.supported_markets().contains(&market)
                    && p.supported_asset_types().contains(&asset_type)
            })
            .cloned()
            .collect()
    }

    /// Like [`providers_for`](Self::providers_for), restricted to candle-capable feeds.
    pub fn candle_providers_for(
        &self,
        market: Market,
        asset_type: AssetType,
    ) -> Vec<Arc<dyn MarketDataProvider>> {
        self.providers_for(market, asset_type)
            .into_iter()
            .filter(|p| p.supports_candles())
            .collect()
    }
}
