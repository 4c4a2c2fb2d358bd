// ═══════════════════════════════════════════════════════════════════
// Error Tests: CoreError variants, Display formatting, classification,
// From impls
// ═══════════════════════════════════════════════════════════════════

use market_assistant_core::errors::CoreError;

// ── Display formatting ──────────────────────────────────────────────

mod display {
    use super::*;

    #[test]
    fn provider_unavailable() {
        let err = CoreError::ProviderUnavailable {
            provider: "Finnhub".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider unavailable (Finnhub): connection refused"
        );
    }

    #[test]
    fn rate_limited() {
        let err = CoreError::RateLimited {
            provider: "Alpha Vantage".into(),
            retry_after_secs: Some(60),
        };
        assert_eq!(err.to_string(), "Rate limited by Alpha Vantage");
    }

    #[test]
    fn timeout() {
        let err = CoreError::Timeout {
            operation: "Finnhub candles for AAPL".into(),
            seconds: 30,
        };
        assert_eq!(
            err.to_string(),
            "Operation 'Finnhub candles for AAPL' timed out after 30s"
        );
    }

    #[test]
    fn no_provider() {
        let err = CoreError::NoProvider("HK crypto candles".into());
        assert_eq!(err.to_string(), "No provider available for HK crypto candles");
    }

    #[test]
    fn validation_error() {
        let err = CoreError::ValidationError("quantity must be positive".into());
        assert_eq!(err.to_string(), "Validation failed: quantity must be positive");
    }

    #[test]
    fn not_found() {
        let err = CoreError::NotFound("asset AAPL".into());
        assert_eq!(err.to_string(), "Not found: asset AAPL");
    }

    #[test]
    fn sync_in_progress() {
        let err = CoreError::SyncInProgress("AAPL".into());
        assert_eq!(err.to_string(), "A sync for AAPL is already running");
    }

    #[test]
    fn analysis_failure() {
        let err = CoreError::AnalysisFailure("empty summary".into());
        assert_eq!(err.to_string(), "Analysis failed: empty summary");
    }

    #[test]
    fn database() {
        let err = CoreError::Database("disk I/O error".into());
        assert_eq!(err.to_string(), "Database error: disk I/O error");
    }

    #[test]
    fn serialization_and_deserialization() {
        assert_eq!(
            CoreError::Serialization("bad float".into()).to_string(),
            "Serialization error: bad float"
        );
        assert_eq!(
            CoreError::Deserialization("unexpected EOF".into()).to_string(),
            "Deserialization error: unexpected EOF"
        );
    }

    #[test]
    fn config() {
        let err = CoreError::Config("missing rate".into());
        assert_eq!(err.to_string(), "Configuration error: missing rate");
    }
}

// ── Retry classification ────────────────────────────────────────────

mod retryable {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(CoreError::ProviderUnavailable {
            provider: "p".into(),
            message: "m".into()
        }
        .is_retryable());
        assert!(CoreError::RateLimited {
            provider: "p".into(),
            retry_after_secs: None
        }
        .is_retryable());
        assert!(CoreError::Timeout {
            operation: "op".into(),
            seconds: 1
        }
        .is_retryable());
    }

    #[test]
    fn caller_and_terminal_errors_are_not_retryable() {
        for err in [
            CoreError::ValidationError("x".into()),
            CoreError::NotFound("x".into()),
            CoreError::NoProvider("x".into()),
            CoreError::SyncInProgress("x".into()),
            CoreError::AnalysisFailure("x".into()),
            CoreError::Database("x".into()),
            CoreError::Config("x".into()),
        ] {
            assert!(!err.is_retryable(), "{err} should not be retryable");
        }
    }
}

// ── From impls ──────────────────────────────────────────────────────

mod conversions {
    use super::*;

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<Vec<f64>>("not json").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Deserialization(_)));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "settings.json missing");
        let err: CoreError = io_err.into();
        match err {
            CoreError::Config(msg) => assert!(msg.contains("settings.json missing")),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn from_rusqlite_error() {
        let err: CoreError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, CoreError::Database(_)));
    }

    #[test]
    fn question_mark_propagates_into_core_error() {
        fn parse(input: &str) -> Result<Vec<f64>, CoreError> {
            Ok(serde_json::from_str(input)?)
        }
        assert!(parse("[1.0, 2.0]").is_ok());
        assert!(matches!(parse("{"), Err(CoreError::Deserialization(_))));
    }
}
