// ═══════════════════════════════════════════════════════════════════
// Model Tests: assets, candles, market information, positions,
// settings
// ═══════════════════════════════════════════════════════════════════

use chrono::NaiveDate;
use std::time::Duration;

use market_assistant_core::errors::CoreError;
use market_assistant_core::models::asset::{validate_symbol, AssetType, Market, NewAsset};
use market_assistant_core::models::market_info::{
    merge_tags, normalize_tag, Importance, ProcessingState, Sentiment, SourceRef, SourceType,
};
use market_assistant_core::models::portfolio::{Position, Transaction, TransactionType};
use market_assistant_core::models::price::{Candle, CandleSeries, CandleStatus, SyncStatus};
use market_assistant_core::models::settings::{Settings, SyncSettings};
use market_assistant_core::services::currency_service::CurrencyService;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn candle(timestamp: i64, close: f64) -> Candle {
    Candle {
        timestamp,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000,
    }
}

// ═══════════════════════════════════════════════════════════════════
// Assets
// ═══════════════════════════════════════════════════════════════════

mod assets {
    use super::*;

    #[test]
    fn market_currencies() {
        assert_eq!(Market::US.currency(), "USD");
        assert_eq!(Market::CN.currency(), "CNY");
        assert_eq!(Market::HK.currency(), "HKD");
    }

    #[test]
    fn market_parse_is_case_insensitive() {
        assert_eq!("us".parse::<Market>().unwrap(), Market::US);
        assert_eq!(" hk ".parse::<Market>().unwrap(), Market::HK);
        assert!(matches!("LSE".parse::<Market>(), Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn market_inference_from_code_shape() {
        assert_eq!(Market::infer("600519"), Market::CN);
        assert_eq!(Market::infer("700"), Market::HK);
        assert_eq!(Market::infer("AAPL"), Market::US);
        assert_eq!(Market::infer(""), Market::US);
    }

    #[test]
    fn asset_type_round_trips_through_str() {
        for t in [AssetType::Stock, AssetType::Etf, AssetType::Fund, AssetType::Crypto] {
            assert_eq!(t.as_str().parse::<AssetType>().unwrap(), t);
        }
    }

    #[test]
    fn symbols_are_normalized() {
        assert_eq!(validate_symbol("  aapl ").unwrap(), "AAPL");
        assert_eq!(validate_symbol("brk.b").unwrap(), "BRK.B");
        assert_eq!(validate_symbol("^gspc").unwrap(), "^GSPC");
    }

    #[test]
    fn invalid_symbols_are_rejected() {
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("   ").is_err());
        assert!(validate_symbol("AA PL").is_err());
        assert!(validate_symbol("DROP;TABLE").is_err());
        assert!(validate_symbol("ABCDEFGHIJKLMNOPQ").is_err());
    }

    #[test]
    fn new_stock_uses_symbol_as_name() {
        let asset = NewAsset::stock("msft", Market::US);
        assert_eq!(asset.symbol, "MSFT");
        assert_eq!(asset.name, "MSFT");
        assert_eq!(asset.asset_type, AssetType::Stock);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Candle series
// ═══════════════════════════════════════════════════════════════════

mod candles {
    use super::*;

    #[test]
    fn from_candles_sorts_and_dedups() {
        let series = CandleSeries::from_candles(vec![
            candle(300, 3.0),
            candle(100, 1.0),
            candle(200, 2.0),
            candle(200, 2.5),
        ]);
        assert_eq!(series.timestamps, vec![100, 200, 300]);
        assert_eq!(series.status, CandleStatus::Ok);
        assert!(series.validate("test").is_ok());
    }

    #[test]
    fn empty_input_is_no_data() {
        let series = CandleSeries::from_candles(Vec::new());
        assert_eq!(series.status, CandleStatus::NoData);
        assert!(series.is_empty());
        assert!(series.validate("test").is_ok());
    }

    #[test]
    fn unequal_lengths_fail_validation() {
        let mut series = CandleSeries::from_candles(vec![candle(100, 1.0), candle(200, 2.0)]);
        series.closes.pop();
        let err = series.validate("Finnhub").unwrap_err();
        assert!(matches!(err, CoreError::ProviderUnavailable { ref provider, .. } if provider == "Finnhub"));
    }

    #[test]
    fn descending_timestamps_fail_validation() {
        let mut series = CandleSeries::from_candles(vec![candle(100, 1.0), candle(200, 2.0)]);
        series.timestamps = vec![200, 100];
        assert!(series.validate("test").is_err());
    }

    #[test]
    fn status_must_match_contents() {
        let mut ok_but_empty = CandleSeries::no_data();
        ok_but_empty.status = CandleStatus::Ok;
        assert!(ok_but_empty.validate("test").is_err());

        let mut no_data_with_rows = CandleSeries::from_candles(vec![candle(100, 1.0)]);
        no_data_with_rows.status = CandleStatus::NoData;
        assert!(no_data_with_rows.validate("test").is_err());
    }

    #[test]
    fn candles_iterates_rows() {
        let series = CandleSeries::from_candles(vec![candle(100, 1.0), candle(200, 2.0)]);
        let closes: Vec<f64> = series.candles().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0]);
    }

    #[test]
    fn sync_status_round_trip() {
        for status in [
            SyncStatus::Succeeded,
            SyncStatus::PartiallyFailed,
            SyncStatus::NoData,
            SyncStatus::Failed,
        ] {
            assert_eq!(SyncStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(SyncStatus::parse("DONE").is_err());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Market information
// ═══════════════════════════════════════════════════════════════════

mod market_info {
    use super::*;

    #[test]
    fn dedup_key_prefers_url() {
        let source = SourceRef {
            source_type: SourceType::Crawl,
            name: "Reuters".into(),
            url: Some("https://Example.com/News/".into()),
        };
        assert_eq!(source.dedup_key(), "https://example.com/news");
    }

    #[test]
    fn dedup_key_without_url_uses_type_and_name() {
        let source = SourceRef {
            source_type: SourceType::Manual,
            name: "  Analyst Note ".into(),
            url: None,
        };
        assert_eq!(source.dedup_key(), "manual:analyst note");
    }

    #[test]
    fn tags_are_normalized() {
        assert_eq!(normalize_tag("  Earnings  Season "), "earnings-season");
        assert_eq!(normalize_tag("AI"), "ai");
    }

    #[test]
    fn merge_tags_skips_duplicates_and_blanks() {
        let mut tags = vec!["earnings".to_string()];
        assert!(merge_tags(&mut tags, &["Earnings".into(), "apple".into(), "  ".into()]));
        assert_eq!(tags, vec!["earnings", "apple"]);
        assert!(!merge_tags(&mut tags, &["APPLE".into()]));
    }

    #[test]
    fn sentiment_and_importance_synonyms() {
        assert_eq!(Sentiment::parse("Bullish").unwrap(), Sentiment::Positive);
        assert_eq!(Sentiment::parse("bearish").unwrap(), Sentiment::Negative);
        assert_eq!(Importance::parse("critical").unwrap(), Importance::High);
        assert!(matches!(Sentiment::parse("sideways"), Err(CoreError::AnalysisFailure(_))));
    }

    #[test]
    fn pending_state_has_no_analysis() {
        let state = ProcessingState::Pending;
        assert!(state.analysis().is_none());
        let failed = ProcessingState::Failed {
            reason: "timeout".into(),
        };
        assert!(failed.analysis().is_none());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Positions & transactions
// ═══════════════════════════════════════════════════════════════════

mod portfolio {
    use super::*;

    fn position(quantity: f64, average_cost: f64, current_price: f64) -> Position {
        Position {
            symbol: "AAPL".into(),
            market: Market::US,
            name: "Apple".into(),
            quantity,
            average_cost,
            current_price,
        }
    }

    #[test]
    fn unrealized_pnl() {
        let p = position(10.0, 100.0, 150.0);
        assert_eq!(p.market_value(), 1500.0);
        assert_eq!(p.cost_basis(), 1000.0);
        assert_eq!(p.unrealized_pnl(), 500.0);
        assert!((p.unrealized_pnl_pct() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn position_currency_follows_market() {
        let mut p = position(1.0, 1.0, 1.0);
        p.market = Market::HK;
        assert_eq!(p.currency(), "HKD");
    }

    #[test]
    fn transaction_builders() {
        let t = Transaction::buy(" aapl", Market::US, 10.0, 100.0, date(2025, 1, 2)).with_fee(1.5);
        assert_eq!(t.symbol, "AAPL");
        assert_eq!(t.transaction_type, TransactionType::Buy);
        assert_eq!(t.gross_amount(), 1000.0);
        assert_eq!(t.fee, 1.5);
        assert_eq!(TransactionType::Sell.as_str(), "SELL");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════

mod settings {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.base_currency, "USD");
        assert!(settings.llm.is_none());
        assert!(settings.database_path.is_none());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let settings = Settings::from_json_str(r#"{"sync": {"max_retries": 5}}"#).unwrap();
        assert_eq!(settings.sync.max_retries, 5);
        assert_eq!(settings.sync.adapter_timeout_secs, 30);
        assert_eq!(settings.ingestion.max_content_chars, 20_000);
        assert_eq!(settings.allocation_bands.stock_target_max, 0.70);
    }

    #[test]
    fn invalid_json_is_config_error() {
        assert!(matches!(Settings::from_json_str("{"), Err(CoreError::Config(_))));
    }

    #[test]
    fn base_currency_must_have_a_rate() {
        let err = Settings::from_json_str(r#"{"base_currency": "EUR"}"#).unwrap_err();
        assert!(matches!(err, CoreError::Config(msg) if msg.contains("EUR")));
    }

    #[test]
    fn rate_keys_match_regardless_of_case() {
        let settings = Settings::from_json_str(
            r#"{"base_currency": "usd", "exchange_rates": {"usd": 1.0, " hkd ": 0.128}}"#,
        )
        .unwrap();
        let currency = CurrencyService::new(&settings.exchange_rates);
        assert!(currency.supports("USD"));
        assert!((currency.convert(1_000.0, "HKD", "usd").unwrap() - 128.0).abs() < 1e-9);
    }

    #[test]
    fn inverted_band_is_rejected() {
        let mut settings = Settings::default();
        settings.allocation_bands.stock_target_min = 0.8;
        settings.allocation_bands.stock_target_max = 0.2;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let mut settings = Settings::default();
        settings.exchange_rates.insert("HKD".into(), 0.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut settings = Settings::default();
        settings.sync.adapter_timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let sync = SyncSettings {
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            ..SyncSettings::default()
        };
        assert_eq!(sync.backoff(0), Duration::from_millis(100));
        assert_eq!(sync.backoff(1), Duration::from_millis(200));
        assert_eq!(sync.backoff(2), Duration::from_millis(350));
        assert_eq!(sync.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.api_keys.insert("finnhub".into(), "key".into());
        std::fs::write(&path, serde_json::to_string(&settings).unwrap()).unwrap();

        let loaded = Settings::from_json_file(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.api_keys.get("finnhub").map(String::as_str), Some("key"));
    }

    #[test]
    fn missing_settings_file_is_config_error() {
        let err = Settings::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
