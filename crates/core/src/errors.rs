use thiserror::Error;

/// Unified error type for the entire market-assistant-core library.
/// Every public function returns `Result<T, CoreError>`.
///
/// "No data for a range" and "duplicate skipped" are not errors here:
/// they are normal outcomes (`CandleStatus::NoData`, `IngestOutcome::DuplicateSkipped`).
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Providers / external services ───────────────────────────────
    #[error("Provider unavailable ({provider}): {message}")]
    ProviderUnavailable {
        provider: String,
        message: String,
    },

    #[error("Rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Operation '{operation}' timed out after {seconds}s")]
    Timeout {
        operation: String,
        seconds: u64,
    },

    #[error("No provider available for {0}")]
    NoProvider(String),

    // ── Caller input ────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A sync for {0} is already running")]
    SyncInProgress(String),

    // ── Ingestion ───────────────────────────────────────────────────
    #[error("Analysis failed: {0}")]
    AnalysisFailure(String),

    // ── Storage / config ────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether a caller may reasonably retry the failed operation
    /// (possibly after a delay).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ProviderUnavailable { .. }
                | CoreError::RateLimited { .. }
                | CoreError::Timeout { .. }
        )
    }

    pub(crate) fn provider(provider: &str, message: impl Into<String>) -> Self {
        CoreError::ProviderUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return CoreError::Timeout {
                operation: "http request".into(),
                seconds: 0,
            };
        }
        if e.status().map(|s| s.as_u16()) == Some(429) {
            return CoreError::RateLimited {
                provider: "http".into(),
                retry_after_secs: None,
            };
        }
        // Strip query parameters: provider URLs carry API keys.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::ProviderUnavailable {
            provider: "http".into(),
            message: sanitized,
        }
    }
}
