use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use market_assistant_core::errors::CoreError;
use market_assistant_core::models::analytics::{AdviceCategory, Allocation, RiskLevel};
use market_assistant_core::models::asset::{AssetType, Market};
use market_assistant_core::models::market_info::{
    ContentFormat, CrawlRequest, Importance, InfoFilter, InfoStatus, IngestOutcome, ManualInput,
    Sentiment,
};
use market_assistant_core::models::portfolio::Transaction;
use market_assistant_core::models::price::{Candle, CandleSeries, Resolution, SyncStatus};
use market_assistant_core::models::settings::Settings;
use market_assistant_core::providers::llm::UnconfiguredAnalyzer;
use market_assistant_core::providers::registry::ProviderRegistry;
use market_assistant_core::providers::traits::{
    AnalysisRequest, AnalysisResult, ContentAnalyzer, FetchedPage, Instrument, MarketDataProvider,
    PageFetcher,
};
use market_assistant_core::services::price_service::PriceSource;
use market_assistant_core::services::sync_service::{SyncMode, SyncRequest};
use market_assistant_core::storage::Database;
use market_assistant_core::MarketAssistant;

// ═══════════════════════════════════════════════════════════════════
// Offline collaborators (no network in these tests)
// ═══════════════════════════════════════════════════════════════════

/// Serves the same three January 2025 sessions for every symbol.
struct MockMarketProvider;

#[async_trait]
impl MarketDataProvider for MockMarketProvider {
    fn name(&self) -> &str {
        "MockMarket"
    }

    fn supported_markets(&self) -> Vec<Market> {
        vec![Market::US, Market::HK, Market::CN]
    }

    fn supported_asset_types(&self) -> Vec<AssetType> {
        vec![AssetType::Stock, AssetType::Etf]
    }

    async fn fetch_candles(
        &self,
        _instrument: &Instrument,
        _resolution: Resolution,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<CandleSeries, CoreError> {
        let candles = [(2, 148.0), (3, 151.0), (6, 150.0)]
            .into_iter()
            .map(|(day, close)| Candle {
                timestamp: Utc
                    .with_ymd_and_hms(2025, 1, day, 14, 30, 0)
                    .unwrap()
                    .timestamp(),
                open: close - 1.0,
                high: close + 2.0,
                low: close - 2.0,
                close,
                volume: 1_000_000,
            })
            .filter(|c| c.timestamp >= from_ts && c.timestamp < to_ts)
            .collect();
        Ok(CandleSeries::from_candles(candles))
    }

    async fn fetch_quote(&self, _instrument: &Instrument) -> Result<f64, CoreError> {
        Ok(150.0)
    }
}

struct MockFetcher;

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CoreError> {
        Ok(FetchedPage {
            url: url.to_string(),
            title: "Apple raises buyback".into(),
            markdown: "Apple announced a larger buyback. AAPL rose 3%.".into(),
        })
    }
}

/// Tags every tracked symbol that appears in the content.
struct KeywordAnalyzer;

#[async_trait]
impl ContentAnalyzer for KeywordAnalyzer {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, CoreError> {
        let positive = request.content.contains("rose");
        Ok(AnalysisResult {
            summary: request.title.clone(),
            sentiment: if positive {
                Sentiment::Positive
            } else {
                Sentiment::Neutral
            },
            sentiment_score: if positive { 0.6 } else { 0.0 },
            importance: Importance::Medium,
            market_impact: "Limited".into(),
            mentioned_symbols: request
                .known_symbols
                .iter()
                .filter(|s| request.content.contains(s.as_str()))
                .cloned()
                .collect(),
            tags: vec!["auto".into()],
        })
    }
}

fn assistant_with(analyzer: Arc<dyn ContentAnalyzer>) -> MarketAssistant {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(MockMarketProvider));
    MarketAssistant::with_components(
        Settings::default(),
        Arc::new(Database::open_in_memory().unwrap()),
        registry,
        Arc::new(MockFetcher),
        analyzer,
    )
    .unwrap()
}

fn assistant() -> MarketAssistant {
    assistant_with(Arc::new(KeywordAnalyzer))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ═══════════════════════════════════════════════════════════════════
// Historical Data
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_sync_then_read_price_history() {
    let app = assistant();
    let report = app
        .sync_historical_data("AAPL", date(2025, 1, 1), date(2025, 1, 31), Market::US)
        .await
        .unwrap();
    assert_eq!(report.status, SyncStatus::Succeeded);
    assert_eq!(report.new_rows, 3);

    let history = app
        .get_price_history("aapl", date(2025, 1, 1), date(2025, 1, 31))
        .unwrap();
    let closes: Vec<f64> = history.iter().map(|p| p.close).collect();
    assert_eq!(closes, vec![148.0, 151.0, 150.0]);

    let partial = app
        .get_price_history("AAPL", date(2025, 1, 3), date(2025, 1, 3))
        .unwrap();
    assert_eq!(partial.len(), 1);

    let runs = app.sync_history("AAPL", 5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].provider.as_deref(), Some("MockMarket"));
}

#[tokio::test]
async fn test_price_history_rejects_inverted_range() {
    let app = assistant();
    let result = app.get_price_history("AAPL", date(2025, 2, 1), date(2025, 1, 1));
    assert!(matches!(result, Err(CoreError::ValidationError(_))));
}

#[tokio::test]
async fn test_sync_many_through_facade() {
    let app = assistant();
    let results = app
        .sync_many(
            vec![
                SyncRequest::new("AAPL", Market::US, date(2025, 1, 2), date(2025, 1, 6)),
                SyncRequest::new("0700", Market::HK, date(2025, 1, 2), date(2025, 1, 6)),
            ],
            SyncMode::Reject,
        )
        .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(app.get_price_history("0700", date(2025, 1, 1), date(2025, 1, 31)).unwrap().len(), 3);

    let again = app
        .sync_with_mode(
            &SyncRequest::new("AAPL", Market::US, date(2025, 1, 2), date(2025, 1, 6)),
            SyncMode::Reject,
        )
        .await
        .unwrap();
    assert_eq!(again.new_rows, 0);
}

#[tokio::test]
async fn test_tracked_asset_type_decides_routing() {
    let app = assistant();

    let bitcoin = app
        .track_asset("btc", Market::US, AssetType::Crypto, Some("Bitcoin"))
        .unwrap();
    assert_eq!(bitcoin.symbol, "BTC");
    assert_eq!(bitcoin.name, "Bitcoin");
    // The mock feed lists stocks and ETFs only
    let result = app
        .sync_historical_data("BTC", date(2025, 1, 2), date(2025, 1, 6), Market::US)
        .await;
    assert!(matches!(result, Err(CoreError::NoProvider(_))));

    // Correcting the type of an auto-created asset keeps its id and cached price
    let synced = app
        .sync_historical_data("QQQ", date(2025, 1, 2), date(2025, 1, 6), Market::US)
        .await
        .unwrap();
    assert_eq!(synced.status, SyncStatus::Succeeded);
    let before = app
        .list_assets()
        .unwrap()
        .into_iter()
        .find(|a| a.symbol == "QQQ")
        .unwrap();
    assert_eq!(before.asset_type, AssetType::Stock);

    let qqq = app
        .track_asset("QQQ", Market::US, AssetType::Etf, Some("Invesco QQQ"))
        .unwrap();
    assert_eq!(qqq.id, before.id);
    assert_eq!(qqq.asset_type, AssetType::Etf);
    assert_eq!(qqq.latest_price, Some(150.0));

    assert!(matches!(
        app.track_asset("", Market::US, AssetType::Etf, None),
        Err(CoreError::ValidationError(_))
    ));
    assert_eq!(app.list_assets().unwrap().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════
// Market Information & Agent Tools
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ingest_and_query_tools() {
    let app = assistant();
    app.sync_historical_data("AAPL", date(2025, 1, 1), date(2025, 1, 31), Market::US)
        .await
        .unwrap();

    let crawl = app
        .crawl_market_info(&CrawlRequest {
            tags: vec!["Buyback".into()],
            ..CrawlRequest::new("https://news.example.com/apple-buyback")
        })
        .await
        .unwrap();
    assert_eq!(crawl.outcome, IngestOutcome::Created(InfoStatus::Processed));

    let stored = app.get_market_info(crawl.id).unwrap();
    assert_eq!(stored.tags, vec!["buyback", "auto"]);
    assert_eq!(stored.linked_assets.len(), 1);

    let linked = app.query_market_info("AAPL").unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id, crawl.id);

    let company = app.query_company_info("AAPL").unwrap();
    assert_eq!(company.last_close, Some(150.0));
    assert_eq!(company.stored_price_points, 3);
    assert_eq!(company.processed_info_count, 1);
    assert_eq!(company.average_sentiment, Some(0.6));

    let text = app.query_asset_info("AAP").unwrap();
    assert!(text.contains("AAPL (US, stock)"), "{text}");

    // Same page again: merged, not re-analyzed
    let again = app
        .crawl_market_info(&CrawlRequest::new("https://news.example.com/apple-buyback/"))
        .await
        .unwrap();
    assert_eq!(again.id, crawl.id);
    assert_eq!(again.outcome, IngestOutcome::DuplicateSkipped);

    assert_eq!(app.delete_market_info_by_tag("buyback").unwrap(), 1);
    assert!(app.query_market_info("AAPL").unwrap().is_empty());
}

#[tokio::test]
async fn test_unconfigured_analyzer_fails_records_cleanly() {
    let app = assistant_with(Arc::new(UnconfiguredAnalyzer));
    let report = app
        .save_market_info(&ManualInput {
            title: "Note".into(),
            content: "Rates unchanged.".into(),
            format: ContentFormat::Text,
            source_name: "desk".into(),
            url: None,
            tags: Vec::new(),
            symbols: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, IngestOutcome::Created(InfoStatus::Failed));

    let failed = app
        .list_market_info(&InfoFilter {
            status: Some(InfoStatus::Failed),
            ..InfoFilter::default()
        })
        .unwrap();
    assert_eq!(failed.len(), 1);

    let retry = app.resubmit_market_info(report.id).await.unwrap();
    assert_eq!(retry.outcome, IngestOutcome::Created(InfoStatus::Failed));
    assert!(app.process_pending_market_info(10).await.unwrap().is_empty());

    app.delete_market_info(report.id).unwrap();
    assert!(matches!(app.get_market_info(report.id), Err(CoreError::NotFound(_))));
}

// ═══════════════════════════════════════════════════════════════════
// Portfolio & Analytics
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_flow_account_trade_refresh_analyze() {
    let app = assistant();
    let account = app.create_account("Long term", None).unwrap();
    app.deposit_cash(account.id, 6_000.0).unwrap();

    app.apply_transaction(
        account.id,
        Transaction::buy("AAPL", Market::US, 10.0, 100.0, date(2025, 1, 2)),
    )
    .unwrap();
    assert_eq!(app.get_account(account.id).unwrap().cash_balance, 5_000.0);

    let updates = app.refresh_prices(account.id).await.unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].source, PriceSource::Live("MockMarket".into()));
    assert_eq!(app.get_positions(account.id).unwrap()[0].current_price, 150.0);

    let analysis = app.get_portfolio_analysis(account.id).unwrap();
    let metrics = &analysis.portfolio_metrics;
    assert!((metrics.total_assets_value - 6_500.0).abs() < 1e-9);
    assert!((metrics.stock_gain - 500.0).abs() < 1e-9);
    assert_eq!(metrics.risk_level, RiskLevel::Medium);
    assert!(analysis
        .advice
        .iter()
        .any(|a| a.category == AdviceCategory::Concentration));

    let (score, level) = app.calculate_risk_score(metrics);
    assert_eq!((score, level), (metrics.risk_score, metrics.risk_level));

    let advice = app.get_allocation_advice(&Allocation {
        stock: 0.5,
        cash: 0.5,
    });
    assert_eq!(advice[0].category, AdviceCategory::General);

    app.apply_transaction(
        account.id,
        Transaction::sell("AAPL", Market::US, 10.0, 150.0, date(2025, 1, 6)),
    )
    .unwrap();
    assert!(app.get_positions(account.id).unwrap().is_empty());
    assert_eq!(app.get_transactions(account.id).unwrap().len(), 2);
    assert_eq!(app.withdraw_cash(account.id, 6_500.0).unwrap().cash_balance, 0.0);
}

// ═══════════════════════════════════════════════════════════════════
// Settings & Persistence
// ═══════════════════════════════════════════════════════════════════

#[test]
fn test_open_with_file_database_persists_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("market.db");
    let settings = Settings {
        database_path: Some(path.to_string_lossy().into_owned()),
        ..Settings::default()
    };

    let id = {
        let app = MarketAssistant::open(settings.clone()).unwrap();
        let account = app.create_account("Persistent", Some("HKD")).unwrap();
        app.deposit_cash(account.id, 100.0).unwrap();
        account.id
    };

    let reopened = MarketAssistant::open(settings).unwrap();
    let account = reopened.get_account(id).unwrap();
    assert_eq!(account.currency, "HKD");
    assert_eq!(account.cash_balance, 100.0);
}

#[test]
fn test_set_and_remove_api_key() {
    let mut app = MarketAssistant::open(Settings::default()).unwrap();
    assert!(app.get_settings().api_keys.is_empty());

    app.set_api_key("finnhub".into(), "test-key".into());
    assert_eq!(
        app.get_settings().api_keys.get("finnhub").map(String::as_str),
        Some("test-key")
    );

    assert!(app.remove_api_key("finnhub"));
    assert!(!app.remove_api_key("finnhub"));
    assert!(app.get_settings().api_keys.is_empty());
}

#[test]
fn test_invalid_settings_are_rejected() {
    let bad_currency = Settings {
        base_currency: "EURO".into(),
        ..Settings::default()
    };
    assert!(matches!(
        MarketAssistant::open(bad_currency),
        Err(CoreError::Config(_))
    ));

    let unknown_rate = Settings {
        base_currency: "EUR".into(),
        ..Settings::default()
    };
    let result = MarketAssistant::with_components(
        unknown_rate,
        Arc::new(Database::open_in_memory().unwrap()),
        ProviderRegistry::new(),
        Arc::new(MockFetcher),
        Arc::new(KeywordAnalyzer),
    );
    assert!(matches!(result, Err(CoreError::Config(_))));
}

#[test]
fn test_settings_from_json_fills_defaults() {
    let settings = Settings::from_json_str(r#"{ "base_currency": "HKD" }"#).unwrap();
    assert_eq!(settings.base_currency, "HKD");
    assert_eq!(settings.exchange_rates.get("CNY"), Some(&0.14));
    assert_eq!(settings.sync.max_retries, 2);
    assert!(settings.llm.is_none());

    assert!(matches!(
        Settings::from_json_str("{ not json"),
        Err(CoreError::Config(_))
    ));
}
