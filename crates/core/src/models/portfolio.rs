use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::asset::{AssetType, Market};

/// A cash account that owns positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    /// Currency of the cash balance and of analytics output (e.g., "USD")
    pub currency: String,
    pub cash_balance: f64,
    pub created_at: DateTime<Utc>,
}

/// A holding inside an account.
///
/// Mutated only by applying transactions, or by price refresh of `current_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub market: Market,
    pub name: String,
    /// Always > 0; a position that reaches zero is removed
    pub quantity: f64,
    /// Weighted average purchase price, in the market's currency
    pub average_cost: f64,
    /// Latest known price, in the market's currency
    pub current_price: f64,
}

impl Position {
    #[must_use]
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    #[must_use]
    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.average_cost
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.average_cost) * self.quantity
    }

    /// Unrealized return in percent of cost basis.
    #[must_use]
    pub fn unrealized_pnl_pct(&self) -> f64 {
        let cost = self.cost_basis();
        if cost > 0.0 {
            self.unrealized_pnl() / cost * 100.0
        } else {
            0.0
        }
    }

    /// Quote currency of this position.
    #[must_use]
    pub fn currency(&self) -> &'static str {
        self.market.currency()
    }
}

/// Type of account transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buy/sell applied to an account.
///
/// `price` and `fee` are in the market's currency; the cash impact is converted
/// into the account currency at the configured fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub symbol: String,
    pub market: Market,
    /// Type used when the trade creates the asset; existing assets keep theirs
    #[serde(default)]
    pub asset_type: AssetType,
    pub quantity: f64,
    pub price: f64,
    #[serde(default)]
    pub fee: f64,
    pub date: NaiveDate,
}

impl Transaction {
    pub fn new(
        transaction_type: TransactionType,
        symbol: impl Into<String>,
        market: Market,
        quantity: f64,
        price: f64,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_type,
            symbol: symbol.into().trim().to_uppercase(),
            market,
            asset_type: AssetType::Stock,
            quantity,
            price,
            fee: 0.0,
            date,
        }
    }

    pub fn buy(symbol: impl Into<String>, market: Market, quantity: f64, price: f64, date: NaiveDate) -> Self {
        Self::new(TransactionType::Buy, symbol, market, quantity, price, date)
    }

    pub fn sell(symbol: impl Into<String>, market: Market, quantity: f64, price: f64, date: NaiveDate) -> Self {
        Self::new(TransactionType::Sell, symbol, market, quantity, price, date)
    }

    #[must_use]
    pub fn with_fee(mut self, fee: f64) -> Self {
        self.fee = fee;
        self
    }

    #[must_use]
    pub fn with_asset_type(mut self, asset_type: AssetType) -> Self {
        self.asset_type = asset_type;
        self
    }

    /// Gross amount in the market's currency (fee excluded).
    #[must_use]
    pub fn gross_amount(&self) -> f64 {
        self.quantity * self.price
    }
}
