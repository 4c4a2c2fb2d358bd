// ═══════════════════════════════════════════════════════════════════
// Provider Tests: response parsing, symbol mapping, registry routing,
// HTML extraction, analysis reply parsing
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use market_assistant_core::errors::CoreError;
use market_assistant_core::models::asset::{AssetType, Market};
use market_assistant_core::models::market_info::{Importance, Sentiment};
use market_assistant_core::models::price::{CandleSeries, CandleStatus, Resolution};
use market_assistant_core::providers::alphavantage::AlphaVantageProvider;
use market_assistant_core::providers::finnhub::FinnhubProvider;
use market_assistant_core::providers::llm::{LlmAnalyzer, UnconfiguredAnalyzer};
use market_assistant_core::providers::registry::ProviderRegistry;
use market_assistant_core::providers::traits::{
    AnalysisRequest, ContentAnalyzer, Instrument, MarketDataProvider,
};
use market_assistant_core::providers::web::HtmlExtractor;
use market_assistant_core::providers::yahoo_finance::YahooFinanceProvider;

// ═══════════════════════════════════════════════════════════════════
// Finnhub
// ═══════════════════════════════════════════════════════════════════

mod finnhub {
    use super::*;

    #[test]
    fn parses_ok_candles() {
        let body = r#"{
            "c": [101.0, 102.5, 103.0],
            "h": [102.0, 103.0, 104.0],
            "l": [99.0, 100.0, 101.5],
            "o": [100.0, 101.0, 102.5],
            "t": [1704153600, 1704240000, 1704326400],
            "v": [1000, 1500.4, 2000],
            "s": "ok"
        }"#;
        let series = FinnhubProvider::parse_candle_response(body).unwrap();
        assert_eq!(series.status, CandleStatus::Ok);
        assert_eq!(series.len(), 3);
        assert_eq!(series.closes, vec![101.0, 102.5, 103.0]);
        assert_eq!(series.volumes, vec![1000, 1500, 2000]);
    }

    #[test]
    fn unsorted_candles_are_sorted() {
        let body = r#"{"c":[2.0,1.0],"h":[2.0,1.0],"l":[2.0,1.0],"o":[2.0,1.0],
                       "t":[200,100],"v":[1,1],"s":"ok"}"#;
        let series = FinnhubProvider::parse_candle_response(body).unwrap();
        assert_eq!(series.timestamps, vec![100, 200]);
        assert_eq!(series.closes, vec![1.0, 2.0]);
    }

    #[test]
    fn no_data_is_not_an_error() {
        let series = FinnhubProvider::parse_candle_response(r#"{"s": "no_data"}"#).unwrap();
        assert_eq!(series, CandleSeries::no_data());
    }

    #[test]
    fn unequal_arrays_are_rejected() {
        let body = r#"{"c":[1.0,2.0],"h":[1.0],"l":[1.0,2.0],"o":[1.0,2.0],
                       "t":[100,200],"v":[1,1],"s":"ok"}"#;
        let err = FinnhubProvider::parse_candle_response(body).unwrap_err();
        assert!(matches!(err, CoreError::ProviderUnavailable { .. }));
    }

    #[test]
    fn limit_message_is_rate_limited() {
        let err = FinnhubProvider::parse_candle_response(
            r#"{"error": "API limit reached. Please try again later."}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::RateLimited { .. }));
    }

    #[test]
    fn other_error_message_is_unavailable() {
        let err = FinnhubProvider::parse_candle_response(r#"{"error": "Invalid API key"}"#)
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Invalid API key"));
    }

    #[test]
    fn garbage_body_is_unavailable() {
        let err = FinnhubProvider::parse_candle_response("<html>502</html>").unwrap_err();
        assert!(matches!(err, CoreError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn inverted_range_is_rejected_before_any_request() {
        let provider = FinnhubProvider::new("key".into()).with_base_url("http://127.0.0.1:9");
        let err = provider
            .fetch_candles(&Instrument::stock("AAPL", Market::US), Resolution::Daily, 200, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
    }

    #[test]
    fn serves_us_equities_only() {
        let provider = FinnhubProvider::new("key".into());
        assert_eq!(provider.supported_markets(), vec![Market::US]);
        assert!(!provider.supported_asset_types().contains(&AssetType::Crypto));
        assert!(provider.supports_candles());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Alpha Vantage
// ═══════════════════════════════════════════════════════════════════

mod alphavantage {
    use super::*;

    #[test]
    fn parses_global_quote() {
        let body = r#"{"Global Quote": {"01. symbol": "IBM", "05. price": "187.4200"}}"#;
        let price = AlphaVantageProvider::parse_quote_response("IBM", body).unwrap();
        assert!((price - 187.42).abs() < 1e-9);
    }

    #[test]
    fn throttle_note_is_rate_limited() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        let err = AlphaVantageProvider::parse_quote_response("IBM", body).unwrap_err();
        assert!(matches!(
            err,
            CoreError::RateLimited {
                retry_after_secs: Some(60),
                ..
            }
        ));
    }

    #[test]
    fn information_field_is_rate_limited() {
        let body = r#"{"Information": "premium endpoint"}"#;
        assert!(matches!(
            AlphaVantageProvider::parse_quote_response("IBM", body),
            Err(CoreError::RateLimited { .. })
        ));
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let body = r#"{"Global Quote": {}}"#;
        assert!(matches!(
            AlphaVantageProvider::parse_quote_response("ZZZZ", body),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn error_message_is_unavailable() {
        let body = r#"{"Error Message": "Invalid API call."}"#;
        assert!(matches!(
            AlphaVantageProvider::parse_quote_response("IBM", body),
            Err(CoreError::ProviderUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn quote_only_feed_refuses_candles() {
        let provider = AlphaVantageProvider::new("key".into());
        assert!(!provider.supports_candles());
        let err = provider
            .fetch_candles(&Instrument::stock("IBM", Market::US), Resolution::Daily, 0, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoProvider(_)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Yahoo Finance symbol mapping
// ═══════════════════════════════════════════════════════════════════

mod yahoo {
    use super::*;

    #[test]
    fn shanghai_and_shenzhen_suffixes() {
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("600519", Market::CN, AssetType::Stock),
            "600519.SS"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("510300", Market::CN, AssetType::Etf),
            "510300.SS"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("000001", Market::CN, AssetType::Stock),
            "000001.SZ"
        );
    }

    #[test]
    fn hong_kong_codes_are_padded() {
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("700", Market::HK, AssetType::Stock),
            "0700.HK"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("00005", Market::HK, AssetType::Stock),
            "0005.HK"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("9988", Market::HK, AssetType::Stock),
            "9988.HK"
        );
    }

    #[test]
    fn crypto_gets_usd_pair() {
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("btc", Market::US, AssetType::Crypto),
            "BTC-USD"
        );
    }

    #[test]
    fn ticker_follows_the_instrument_not_the_symbol_shape() {
        let bitcoin = Instrument::new("BTC", Market::US, AssetType::Crypto);
        assert_eq!(YahooFinanceProvider::ticker_for(&bitcoin), "BTC-USD");
        // Same code, listed as a fund
        let fund = Instrument::new("BTC", Market::US, AssetType::Fund);
        assert_eq!(YahooFinanceProvider::ticker_for(&fund), "BTC");
        // Market comes from the instrument, not from the code shape
        let tencent = Instrument::stock("700", Market::HK);
        assert_eq!(YahooFinanceProvider::ticker_for(&tencent), "0700.HK");
        let hk_listed = Instrument::stock("600519", Market::HK);
        assert_eq!(YahooFinanceProvider::ticker_for(&hk_listed), "600519.HK");
    }

    #[test]
    fn us_and_suffixed_symbols_pass_through() {
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("aapl", Market::US, AssetType::Stock),
            "AAPL"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("BRK-B", Market::US, AssetType::Stock),
            "BRK-B"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("0700.HK", Market::HK, AssetType::Stock),
            "0700.HK"
        );
        assert_eq!(
            YahooFinanceProvider::yahoo_symbol("^GSPC", Market::US, AssetType::Fund),
            "^GSPC"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════
// Registry routing
// ═══════════════════════════════════════════════════════════════════

struct StubProvider {
    name: &'static str,
    markets: Vec<Market>,
    candles: bool,
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn supported_markets(&self) -> Vec<Market> {
        self.markets.clone()
    }

    fn supported_asset_types(&self) -> Vec<AssetType> {
        vec![AssetType::Stock, AssetType::Etf]
    }

    fn supports_candles(&self) -> bool {
        self.candles
    }

    async fn fetch_candles(
        &self,
        _instrument: &Instrument,
        _resolution: Resolution,
        _from_ts: i64,
        _to_ts: i64,
    ) -> Result<CandleSeries, CoreError> {
        Ok(CandleSeries::no_data())
    }

    async fn fetch_quote(&self, _instrument: &Instrument) -> Result<f64, CoreError> {
        Ok(1.0)
    }
}

mod registry {
    use super::*;

    fn stub(name: &'static str, markets: Vec<Market>, candles: bool) -> Arc<dyn MarketDataProvider> {
        Arc::new(StubProvider {
            name,
            markets,
            candles,
        })
    }

    fn names(providers: &[Arc<dyn MarketDataProvider>]) -> Vec<String> {
        providers.iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn routes_by_market_in_registration_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(stub("primary", vec![Market::US], true));
        registry.register(stub("regional", vec![Market::CN, Market::HK, Market::US], true));
        registry.register(stub("quotes", vec![Market::US], false));

        assert_eq!(
            names(&registry.providers_for(Market::US, AssetType::Stock)),
            vec!["primary", "regional", "quotes"]
        );
        assert_eq!(
            names(&registry.candle_providers_for(Market::US, AssetType::Stock)),
            vec!["primary", "regional"]
        );
        assert_eq!(
            names(&registry.providers_for(Market::HK, AssetType::Etf)),
            vec!["regional"]
        );
    }

    #[test]
    fn unsupported_asset_type_has_no_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(stub("primary", vec![Market::US], true));
        assert!(registry.providers_for(Market::US, AssetType::Crypto).is_empty());
    }

    #[test]
    fn defaults_register_keyed_providers_only_when_configured() {
        let without_keys = ProviderRegistry::new_with_defaults(&HashMap::new());
        assert!(without_keys
            .providers_for(Market::US, AssetType::Stock)
            .iter()
            .all(|p| p.name() != "Finnhub"));

        let mut keys = HashMap::new();
        keys.insert("finnhub".to_string(), "k".to_string());
        keys.insert("alphavantage".to_string(), "k".to_string());
        let with_keys = ProviderRegistry::new_with_defaults(&keys);
        let us = names(&with_keys.providers_for(Market::US, AssetType::Stock));
        assert_eq!(us.first().map(String::as_str), Some("Finnhub"));
        assert_eq!(with_keys.len(), without_keys.len() + 2);
    }
}

// ═══════════════════════════════════════════════════════════════════
// HTML extraction
// ═══════════════════════════════════════════════════════════════════

mod html {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Apple beats   estimates &amp; raises guidance</title>
  <style>body { color: red; }</style>
  <script>var tracking = "<p>not content</p>";</script>
</head>
<body>
  <nav><a href="/">Home</a> | <a href="/markets">Markets</a></nav>
  <!-- ad slot -->
  <article>
    <h1>Apple beats estimates</h1>
    <p>Revenue rose&nbsp;8% to <b>$94.9B</b>.</p>
    <h2>Highlights</h2>
    <ul>
      <li>Services at record</li>
      <li>iPhone &#8211; flat</li>
    </ul>
  </article>
  <footer>Copyright 2025</footer>
</body>
</html>"#;

    #[test]
    fn extracts_title() {
        let extractor = HtmlExtractor::new().unwrap();
        assert_eq!(
            extractor.title(PAGE).as_deref(),
            Some("Apple beats estimates & raises guidance")
        );
        assert_eq!(extractor.title("<p>no title</p>"), None);
    }

    #[test]
    fn converts_structure_to_markdown() {
        let extractor = HtmlExtractor::new().unwrap();
        let md = extractor.to_markdown(PAGE);
        assert!(md.contains("# Apple beats estimates"), "{md}");
        assert!(md.contains("## Highlights"), "{md}");
        assert!(md.contains("- Services at record"), "{md}");
        assert!(md.contains("- iPhone \u{2013} flat"), "{md}");
        assert!(md.contains("Revenue rose 8% to $94.9B."), "{md}");
    }

    #[test]
    fn drops_boilerplate() {
        let extractor = HtmlExtractor::new().unwrap();
        let md = extractor.to_markdown(PAGE);
        for unwanted in ["tracking", "color: red", "Home", "Copyright", "ad slot", "<"] {
            assert!(!md.contains(unwanted), "{unwanted:?} leaked into {md}");
        }
    }

    #[test]
    fn collapses_blank_lines() {
        let extractor = HtmlExtractor::new().unwrap();
        let md = extractor.to_markdown("<p>one</p><p></p><p></p><div></div><p>two</p>");
        assert_eq!(md, "one\n\ntwo");
    }

    #[test]
    fn escaped_entities_stay_literal() {
        let extractor = HtmlExtractor::new().unwrap();
        assert_eq!(extractor.to_markdown("a &amp;lt; b"), "a &lt; b");
    }
}

// ═══════════════════════════════════════════════════════════════════
// Analysis replies
// ═══════════════════════════════════════════════════════════════════

mod analysis {
    use super::*;

    #[test]
    fn parses_fenced_json_reply() {
        let reply = r#"Here you go:
```json
{"summary": "Apple beat estimates.", "sentiment": "positive", "sentiment_score": 0.7,
 "importance": "high", "market_impact": "Likely gap up.",
 "mentioned_symbols": ["AAPL"], "tags": ["earnings"]}
```"#;
        let result = LlmAnalyzer::parse_reply(reply).unwrap();
        assert_eq!(result.summary, "Apple beat estimates.");
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert_eq!(result.importance, Importance::High);
        assert_eq!(result.mentioned_symbols, vec!["AAPL"]);
        assert_eq!(result.tags, vec!["earnings"]);
    }

    #[test]
    fn score_is_clamped() {
        let reply = r#"{"summary": "s", "sentiment": "negative", "sentiment_score": -3.5,
 "importance": "low", "market_impact": " Mild pressure. "}"#;
        let result = LlmAnalyzer::parse_reply(reply).unwrap();
        assert_eq!(result.sentiment_score, -1.0);
        assert_eq!(result.market_impact, "Mild pressure.");
    }

    #[test]
    fn missing_or_blank_market_impact_fails() {
        let missing = r#"{"summary": "s", "sentiment": "neutral", "sentiment_score": 0, "importance": "low"}"#;
        let blank = r#"{"summary": "s", "sentiment": "neutral", "sentiment_score": 0,
 "importance": "low", "market_impact": "  "}"#;
        for reply in [missing, blank] {
            assert!(matches!(
                LlmAnalyzer::parse_reply(reply),
                Err(CoreError::AnalysisFailure(_))
            ));
        }
    }

    #[test]
    fn reply_without_json_fails() {
        assert!(matches!(
            LlmAnalyzer::parse_reply("I cannot help with that."),
            Err(CoreError::AnalysisFailure(_))
        ));
    }

    #[test]
    fn empty_summary_fails() {
        let reply = r#"{"summary": "  ", "sentiment": "neutral", "sentiment_score": 0, "importance": "low"}"#;
        assert!(matches!(
            LlmAnalyzer::parse_reply(reply),
            Err(CoreError::AnalysisFailure(_))
        ));
    }

    #[test]
    fn unknown_sentiment_fails() {
        let reply = r#"{"summary": "s", "sentiment": "sideways", "sentiment_score": 0,
 "importance": "low", "market_impact": "None."}"#;
        assert!(matches!(
            LlmAnalyzer::parse_reply(reply),
            Err(CoreError::AnalysisFailure(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_analyzer_always_fails() {
        let request = AnalysisRequest {
            title: "t".into(),
            content: "c".into(),
            known_symbols: Vec::new(),
        };
        let err = UnconfiguredAnalyzer.analyze(&request).await.unwrap_err();
        assert!(matches!(err, CoreError::AnalysisFailure(_)));
    }
}
