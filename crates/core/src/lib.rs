pub mod errors;
pub mod logging;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use errors::CoreError;
use models::{
    analytics::{Allocation, AllocationAdvice, CompanyInfo, PortfolioAnalysis, PortfolioMetrics, RiskLevel},
    asset::{validate_symbol, AssetMeta, AssetType, Market, NewAsset},
    market_info::{CrawlRequest, InfoFilter, IngestReport, ManualInput, MarketInformation},
    portfolio::{Account, Position, Transaction},
    price::{PricePoint, SyncReport, SyncRun},
    settings::Settings,
};
use providers::{
    llm::{LlmAnalyzer, UnconfiguredAnalyzer},
    registry::ProviderRegistry,
    traits::{ContentAnalyzer, PageFetcher},
    web::HttpPageFetcher,
};
use services::{
    analytics_service::AnalyticsService,
    currency_service::CurrencyService,
    ingestion_service::IngestionService,
    portfolio_service::PortfolioService,
    price_service::{PriceService, PriceUpdate},
    query_service::QueryService,
    sync_service::{SyncMode, SyncRequest, SyncService},
};
use storage::{
    account_repository::AccountRepository, asset_repository::AssetRepository,
    market_info_repository::MarketInfoRepository, price_repository::PriceRepository, Database,
};

/// Main entry point for the market assistant core library.
///
/// Owns the database handle and every service; all collaborators are passed
/// in explicitly (see [`MarketAssistant::with_components`]), so tests can
/// swap providers, fetchers and analyzers for fakes.
#[must_use]
pub struct MarketAssistant {
    settings: Settings,
    db: Arc<Database>,
    sync_service: Arc<SyncService>,
    ingestion_service: IngestionService,
    portfolio_service: PortfolioService,
    price_service: PriceService,
    analytics_service: AnalyticsService,
    query_service: QueryService,
}

impl std::fmt::Debug for MarketAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketAssistant")
            .field("base_currency", &self.settings.base_currency)
            .field("database", &self.settings.database_path)
            .field("llm", &self.settings.llm.as_ref().map(|l| &l.model))
            .finish_non_exhaustive()
    }
}

impl MarketAssistant {
    /// Build an assistant from settings with the default network collaborators.
    ///
    /// Opens `settings.database_path` (in-memory when unset), registers the
    /// providers whose API keys are configured, and uses the LLM analyzer
    /// when `settings.llm` is present.
    pub fn open(settings: Settings) -> Result<Self, CoreError> {
        settings.validate()?;
        let db = match &settings.database_path {
            Some(path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        };
        let registry = ProviderRegistry::new_with_defaults(&settings.api_keys);
        let fetcher: Arc<dyn PageFetcher> =
            Arc::new(HttpPageFetcher::new(settings.ingestion.fetch_timeout())?);
        let analyzer: Arc<dyn ContentAnalyzer> = match &settings.llm {
            Some(llm) => Arc::new(LlmAnalyzer::new(
                llm.clone(),
                settings.ingestion.analysis_timeout(),
            )),
            None => Arc::new(UnconfiguredAnalyzer),
        };
        info!(providers = registry.len(), "Market assistant ready");
        Self::with_components(settings, Arc::new(db), registry, fetcher, analyzer)
    }

    /// Build an assistant from explicit collaborators.
    pub fn with_components(
        settings: Settings,
        db: Arc<Database>,
        registry: ProviderRegistry,
        fetcher: Arc<dyn PageFetcher>,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        let assets = AssetRepository::new(Arc::clone(&db));
        let prices = PriceRepository::new(Arc::clone(&db));
        let accounts = AccountRepository::new(Arc::clone(&db));
        let infos = MarketInfoRepository::new(Arc::clone(&db));
        let currency_service = CurrencyService::new(&settings.exchange_rates);

        Ok(Self {
            sync_service: Arc::new(SyncService::new(
                registry.clone(),
                prices.clone(),
                assets.clone(),
                settings.sync.clone(),
            )),
            ingestion_service: IngestionService::new(
                infos.clone(),
                assets.clone(),
                fetcher,
                analyzer,
                settings.ingestion.clone(),
            )?,
            portfolio_service: PortfolioService::new(
                accounts.clone(),
                assets.clone(),
                currency_service.clone(),
                settings.base_currency.clone(),
            ),
            price_service: PriceService::new(registry, assets.clone(), prices.clone(), accounts),
            analytics_service: AnalyticsService::new(
                settings.allocation_bands.clone(),
                currency_service,
            ),
            query_service: QueryService::new(assets, prices, infos),
            settings,
            db,
        })
    }

    // ── Assets ──────────────────────────────────────────────────────

    /// Register an instrument, or correct the type/name of an existing one.
    ///
    /// The asset type decides which providers serve it (e.g., crypto goes
    /// to adapters that list crypto, and Yahoo fetches `<COIN>-USD`).
    /// `name` defaults to the symbol.
    pub fn track_asset(
        &self,
        symbol: &str,
        market: Market,
        asset_type: AssetType,
        name: Option<&str>,
    ) -> Result<AssetMeta, CoreError> {
        let symbol = validate_symbol(symbol)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&symbol)
            .to_string();
        AssetRepository::new(Arc::clone(&self.db)).track(&NewAsset::new(
            &symbol, market, asset_type, name,
        ))
    }

    /// Every tracked instrument, by symbol then market.
    pub fn list_assets(&self) -> Result<Vec<AssetMeta>, CoreError> {
        AssetRepository::new(Arc::clone(&self.db)).list()
    }

    // ── Historical Sync ─────────────────────────────────────────────

    /// Pull daily prices for `[from, to]` into storage.
    pub async fn sync_historical_data(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        market: Market,
    ) -> Result<SyncReport, CoreError> {
        self.sync_service
            .sync_historical_data(symbol, from, to, market)
            .await
    }

    /// Sync with an explicit policy for concurrent requests on the same symbol.
    pub async fn sync_with_mode(
        &self,
        request: &SyncRequest,
        mode: SyncMode,
    ) -> Result<SyncReport, CoreError> {
        self.sync_service.sync(request, mode).await
    }

    /// Sync several symbols concurrently; one result per request, in order.
    pub async fn sync_many(
        &self,
        requests: Vec<SyncRequest>,
        mode: SyncMode,
    ) -> Vec<Result<SyncReport, CoreError>> {
        self.sync_service.sync_many(requests, mode).await
    }

    /// Recorded sync outcomes for a symbol, newest first.
    pub fn sync_history(&self, symbol: &str, limit: usize) -> Result<Vec<SyncRun>, CoreError> {
        let symbol = validate_symbol(symbol)?;
        PriceRepository::new(Arc::clone(&self.db)).sync_runs(&symbol, limit)
    }

    /// Stored daily prices for `[from, to]`, oldest first.
    pub fn get_price_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PricePoint>, CoreError> {
        if from > to {
            return Err(CoreError::ValidationError(format!(
                "'from' date ({from}) must not be after 'to' date ({to})"
            )));
        }
        let symbol = validate_symbol(symbol)?;
        PriceRepository::new(Arc::clone(&self.db)).range(&symbol, from, to)
    }

    // ── Market Information ──────────────────────────────────────────

    pub async fn crawl_market_info(&self, request: &CrawlRequest) -> Result<IngestReport, CoreError> {
        self.ingestion_service.crawl_market_info(request).await
    }

    pub async fn save_market_info(&self, input: &ManualInput) -> Result<IngestReport, CoreError> {
        self.ingestion_service.save_market_info(input).await
    }

    pub fn get_market_info(&self, id: Uuid) -> Result<MarketInformation, CoreError> {
        self.ingestion_service.get(id)
    }

    pub fn list_market_info(&self, filter: &InfoFilter) -> Result<Vec<MarketInformation>, CoreError> {
        self.ingestion_service.list(filter)
    }

    pub fn delete_market_info(&self, id: Uuid) -> Result<(), CoreError> {
        self.ingestion_service.delete(id)
    }

    pub fn delete_market_info_by_tag(&self, tag: &str) -> Result<usize, CoreError> {
        self.ingestion_service.delete_by_tag(tag)
    }

    /// Retry analysis of a FAILED record as a new attempt.
    pub async fn resubmit_market_info(&self, failed_id: Uuid) -> Result<IngestReport, CoreError> {
        self.ingestion_service.resubmit(failed_id).await
    }

    /// Finish records left PENDING by interrupted analyses.
    pub async fn process_pending_market_info(&self, limit: usize) -> Result<Vec<IngestReport>, CoreError> {
        self.ingestion_service.process_pending(limit).await
    }

    // ── Agent Tools ─────────────────────────────────────────────────

    pub fn query_asset_info(&self, query: &str) -> Result<String, CoreError> {
        self.query_service.query_asset_info(query)
    }

    pub fn query_market_info(&self, symbol: &str) -> Result<Vec<MarketInformation>, CoreError> {
        self.query_service.query_market_info(symbol)
    }

    pub fn query_company_info(&self, symbol: &str) -> Result<CompanyInfo, CoreError> {
        self.query_service.query_company_info(symbol)
    }

    // ── Accounts & Transactions ─────────────────────────────────────

    /// Open an account; `currency` defaults to the base currency.
    pub fn create_account(&self, name: &str, currency: Option<&str>) -> Result<Account, CoreError> {
        self.portfolio_service.create_account(name, currency)
    }

    pub fn get_account(&self, id: Uuid) -> Result<Account, CoreError> {
        self.portfolio_service.get_account(id)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.portfolio_service.list_accounts()
    }

    pub fn deposit_cash(&self, account_id: Uuid, amount: f64) -> Result<Account, CoreError> {
        self.portfolio_service.deposit_cash(account_id, amount)
    }

    pub fn withdraw_cash(&self, account_id: Uuid, amount: f64) -> Result<Account, CoreError> {
        self.portfolio_service.withdraw_cash(account_id, amount)
    }

    /// Apply a buy/sell; returns the resulting position (`None` once closed).
    pub fn apply_transaction(
        &self,
        account_id: Uuid,
        transaction: Transaction,
    ) -> Result<Option<Position>, CoreError> {
        self.portfolio_service.apply_transaction(account_id, transaction)
    }

    pub fn get_positions(&self, account_id: Uuid) -> Result<Vec<Position>, CoreError> {
        self.portfolio_service.positions(account_id)
    }

    pub fn get_transactions(&self, account_id: Uuid) -> Result<Vec<Transaction>, CoreError> {
        self.portfolio_service.transactions(account_id)
    }

    /// Refresh `current_price` of every position in the account.
    pub async fn refresh_prices(&self, account_id: Uuid) -> Result<Vec<PriceUpdate>, CoreError> {
        self.price_service.refresh_prices(account_id).await
    }

    // ── Analytics ───────────────────────────────────────────────────

    /// Cash line, per-position breakdown, metrics and advice for an account.
    pub fn get_portfolio_analysis(&self, account_id: Uuid) -> Result<PortfolioAnalysis, CoreError> {
        let account = self.portfolio_service.get_account(account_id)?;
        let positions = self.portfolio_service.positions(account_id)?;
        self.analytics_service.analyze(&account, &positions)
    }

    #[must_use]
    pub fn calculate_risk_score(&self, metrics: &PortfolioMetrics) -> (f64, RiskLevel) {
        self.analytics_service.calculate_risk_score(metrics)
    }

    #[must_use]
    pub fn get_allocation_advice(&self, allocation: &Allocation) -> Vec<AllocationAdvice> {
        self.analytics_service.get_allocation_advice(allocation)
    }

    // ── Settings ────────────────────────────────────────────────────

    #[must_use]
    pub fn get_settings(&self) -> &Settings {
        &self.settings
    }

    /// Set an API key for a provider (e.g., "finnhub", "alphavantage").
    /// Rebuilds the provider registry so the new key takes effect immediately.
    pub fn set_api_key(&mut self, provider: String, key: String) {
        self.settings.api_keys.insert(provider, key);
        self.rebuild_market_data();
    }

    /// Remove an API key for a provider.
    pub fn remove_api_key(&mut self, provider: &str) -> bool {
        let removed = self.settings.api_keys.remove(provider).is_some();
        if removed {
            self.rebuild_market_data();
        }
        removed
    }

    fn rebuild_market_data(&mut self) {
        let registry = ProviderRegistry::new_with_defaults(&self.settings.api_keys);
        let assets = AssetRepository::new(Arc::clone(&self.db));
        let prices = PriceRepository::new(Arc::clone(&self.db));
        self.sync_service = Arc::new(SyncService::new(
            registry.clone(),
            prices.clone(),
            assets.clone(),
            self.settings.sync.clone(),
        ));
        self.price_service = PriceService::new(
            registry,
            assets,
            prices,
            AccountRepository::new(Arc::clone(&self.db)),
        );
    }
}
