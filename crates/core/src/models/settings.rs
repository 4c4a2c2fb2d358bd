use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::CoreError;

use super::analytics::AllocationBands;

/// Engine configuration, passed explicitly into every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default currency for new accounts (e.g., "USD").
    pub base_currency: String,

    /// Optional API keys for providers that require them.
    /// Keys: provider name ("finnhub", "alphavantage").
    pub api_keys: HashMap<String, String>,

    /// Fixed exchange rates: USD value of one unit of each currency.
    pub exchange_rates: HashMap<String, f64>,

    pub allocation_bands: AllocationBands,

    pub sync: SyncSettings,

    pub ingestion: IngestionSettings,

    /// Analysis service; when absent every analysis fails with a clear reason.
    pub llm: Option<LlmSettings>,

    /// SQLite file path; `None` means an in-memory database.
    pub database_path: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        let exchange_rates = [("USD", 1.0), ("CNY", 0.14), ("HKD", 0.128)]
            .into_iter()
            .map(|(code, rate)| (code.to_string(), rate))
            .collect();

        Self {
            base_currency: "USD".to_string(),
            api_keys: HashMap::new(),
            exchange_rates,
            allocation_bands: AllocationBands::default(),
            sync: SyncSettings::default(),
            ingestion: IngestionSettings::default(),
            llm: None,
            database_path: None,
        }
    }
}

/// Historical synchronizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Retries per provider for retryable failures (total attempts = retries + 1)
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_max_ms: u64,
    /// Bound on a single adapter call
    pub adapter_timeout_secs: u64,
    /// Offset used to truncate candle timestamps to calendar dates
    pub utc_offset_minutes: i32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            adapter_timeout_secs: 30,
            utc_offset_minutes: 0,
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(scaled.min(self.backoff_max_ms))
    }
}

/// Ingestion pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub fetch_timeout_secs: u64,
    pub analysis_timeout_secs: u64,
    /// Content longer than this is truncated before analysis
    pub max_content_chars: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 20,
            analysis_timeout_secs: 60,
            max_content_chars: 20_000,
        }
    }
}

impl IngestionSettings {
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

/// OpenAI-compatible chat-completions endpoint used for content analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Full URL of the chat completions endpoint
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
}

impl Settings {
    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| CoreError::Config(format!("Invalid settings JSON: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: &str) -> Result<Self, CoreError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Apply `FINNHUB_API_KEY`, `ALPHAVANTAGE_API_KEY`, `LLM_API_KEY` and
    /// `MARKET_DB_PATH` from the environment when set.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        for (provider, var) in [("finnhub", "FINNHUB_API_KEY"), ("alphavantage", "ALPHAVANTAGE_API_KEY")] {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    self.api_keys.insert(provider.to_string(), key);
                }
            }
        }
        if let (Some(llm), Ok(key)) = (self.llm.as_mut(), std::env::var("LLM_API_KEY")) {
            llm.api_key = key;
        }
        if let Ok(path) = std::env::var("MARKET_DB_PATH") {
            self.database_path = Some(path);
        }
        self
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), CoreError> {
        let code = self.base_currency.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CoreError::Config(format!(
                "Invalid base currency '{}': must be exactly 3 ASCII letters",
                self.base_currency
            )));
        }
        let base = currency_code(code);
        if !self.exchange_rates.keys().any(|key| currency_code(key) == base) {
            return Err(CoreError::Config(format!(
                "No exchange rate configured for base currency {base}"
            )));
        }
        if let Some((currency, rate)) = self
            .exchange_rates
            .iter()
            .find(|(_, rate)| !rate.is_finite() || **rate <= 0.0)
        {
            return Err(CoreError::Config(format!(
                "Exchange rate for {currency} must be positive, got {rate}"
            )));
        }

        let bands = &self.allocation_bands;
        if !(0.0..=1.0).contains(&bands.stock_target_min)
            || !(0.0..=1.0).contains(&bands.stock_target_max)
            || bands.stock_target_min > bands.stock_target_max
        {
            return Err(CoreError::Config(format!(
                "Stock target band [{}, {}] must satisfy 0 <= min <= max <= 1",
                bands.stock_target_min, bands.stock_target_max
            )));
        }
        if bands.medium_risk_threshold > bands.high_risk_threshold {
            return Err(CoreError::Config(
                "Medium risk threshold must not exceed the high risk threshold".into(),
            ));
        }
        if self.sync.adapter_timeout_secs == 0 || self.ingestion.analysis_timeout_secs == 0 {
            return Err(CoreError::Config("Timeouts must be at least one second".into()));
        }
        Ok(())
    }
}

/// Canonical form of a currency code (`" usd"` → `"USD"`), used for rate lookups.
#[must_use]
pub fn currency_code(code: &str) -> String {
    code.trim().to_uppercase()
}
