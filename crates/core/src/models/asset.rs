use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::CoreError;

/// Exchange region an instrument trades in.
/// Determines which provider adapters can serve it and its quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// US exchanges (NYSE, NASDAQ, ...) quoted in USD
    US,
    /// Mainland China (Shanghai, Shenzhen) quoted in CNY
    CN,
    /// Hong Kong quoted in HKD
    HK,
}

impl Market {
    /// Currency instruments on this market are quoted in.
    #[must_use]
    pub fn currency(&self) -> &'static str {
        match self {
            Market::US => "USD",
            Market::CN => "CNY",
            Market::HK => "HKD",
        }
    }

    /// Best-effort market guess for a bare ticker: 6 digits → CN, other digits → HK.
    #[must_use]
    pub fn infer(symbol: &str) -> Market {
        let all_digits = !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_digit());
        match (all_digits, symbol.len()) {
            (true, 6) => Market::CN,
            (true, _) => Market::HK,
            _ => Market::US,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::US => "US",
            Market::CN => "CN",
            Market::HK => "HK",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "US" => Ok(Market::US),
            "CN" => Ok(Market::CN),
            "HK" => Ok(Market::HK),
            other => Err(CoreError::ValidationError(format!(
                "Unknown market '{other}' (expected US, CN or HK)"
            ))),
        }
    }
}

/// The type/category of a tracked instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssetType {
    #[default]
    Stock,
    Etf,
    Fund,
    Crypto,
}

impl AssetType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Stock => "stock",
            AssetType::Etf => "etf",
            AssetType::Fund => "fund",
            AssetType::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stock" => Ok(AssetType::Stock),
            "etf" => Ok(AssetType::Etf),
            "fund" => Ok(AssetType::Fund),
            "crypto" => Ok(AssetType::Crypto),
            other => Err(CoreError::ValidationError(format!(
                "Unknown asset type '{other}'"
            ))),
        }
    }
}

/// Identity of a tracked instrument, shared by positions and market information.
///
/// One row per `(symbol, market)`. The repository refuses to delete an asset
/// while any position still references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub id: i64,

    /// Ticker symbol, uppercased (e.g., "AAPL", "600519", "0700")
    pub symbol: String,

    pub market: Market,

    pub asset_type: AssetType,

    /// Human-readable name; defaults to the symbol when unknown
    pub name: String,

    /// Latest cached price in the market's currency
    pub latest_price: Option<f64>,

    pub price_updated_at: Option<DateTime<Utc>>,
}

/// Data needed to create an [`AssetMeta`] row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAsset {
    pub symbol: String,
    pub market: Market,
    pub asset_type: AssetType,
    pub name: String,
}

impl NewAsset {
    pub fn new(
        symbol: impl Into<String>,
        market: Market,
        asset_type: AssetType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            symbol: normalize_symbol(&symbol.into()),
            market,
            asset_type,
            name: name.into(),
        }
    }

    /// Convenience constructor for a stock whose name is not known yet.
    pub fn stock(symbol: impl Into<String>, market: Market) -> Self {
        let symbol = normalize_symbol(&symbol.into());
        let name = symbol.clone();
        Self {
            symbol,
            market,
            asset_type: AssetType::Stock,
            name,
        }
    }
}

/// Uppercase and trim a ticker symbol.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Validate a ticker symbol: non-empty, at most 16 chars, `[A-Z0-9.-^]` only.
pub fn validate_symbol(symbol: &str) -> Result<String, CoreError> {
    let normalized = normalize_symbol(symbol);
    if normalized.is_empty() {
        return Err(CoreError::ValidationError("Symbol must not be empty".into()));
    }
    if normalized.len() > 16 {
        return Err(CoreError::ValidationError(format!(
            "Symbol '{normalized}' is longer than 16 characters"
        )));
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^'))
    {
        return Err(CoreError::ValidationError(format!(
            "Symbol '{normalized}' contains invalid characters"
        )));
    }
    Ok(normalized)
}
