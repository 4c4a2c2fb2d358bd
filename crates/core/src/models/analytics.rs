use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::asset::{AssetMeta, Market};

/// Fractions of total portfolio value by category.
/// `stock + cash == 1.0` (within float epsilon) whenever the total is positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub stock: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Target allocation bands and risk thresholds used by the analytics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationBands {
    /// Lower bound of the target stock allocation (fraction, 0..=1)
    pub stock_target_min: f64,
    /// Upper bound of the target stock allocation (fraction, 0..=1)
    pub stock_target_max: f64,
    /// Largest acceptable weight of a single position within the stock sleeve
    pub max_single_position_weight: f64,
    /// Diversification score below which diversification advice is given
    pub min_diversification_score: f64,
    /// Weight of stock allocation (in percent points) in the risk score
    pub stock_weight_factor: f64,
    /// Weight of the diversification shortfall in the risk score
    pub diversification_weight_factor: f64,
    /// Risk score at or above which the level is `Medium`
    pub medium_risk_threshold: f64,
    /// Risk score at or above which the level is `High`
    pub high_risk_threshold: f64,
}

impl Default for AllocationBands {
    fn default() -> Self {
        Self {
            stock_target_min: 0.30,
            stock_target_max: 0.70,
            max_single_position_weight: 0.40,
            min_diversification_score: 40.0,
            stock_weight_factor: 0.6,
            diversification_weight_factor: 0.4,
            medium_risk_threshold: 35.0,
            high_risk_threshold: 60.0,
        }
    }
}

/// Computed portfolio snapshot. Derived on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Cash plus the market value of all positions
    pub total_assets_value: f64,
    /// Sum of `average_cost * quantity` over positions
    pub total_cost: f64,
    /// Sum of position market values
    pub stock_value: f64,
    /// Sum of unrealized P&L over positions
    pub stock_gain: f64,
    pub allocation: Allocation,
    pub position_count: usize,
    /// Largest single position weight within the stock sleeve (0..=1)
    pub largest_position_weight: f64,
    /// 0..=100, higher is more diversified
    pub diversification_score: f64,
    /// 0..=100, higher is riskier
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdviceCategory {
    Rebalance,
    Concentration,
    Diversification,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AdvicePriority {
    Low,
    Medium,
    High,
}

/// A textual allocation recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationAdvice {
    pub category: AdviceCategory,
    pub priority: AdvicePriority,
    pub message: String,
}

impl std::fmt::Display for AllocationAdvice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Cash line of a portfolio analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashAsset {
    pub balance: f64,
    pub currency: String,
    /// Fraction of total assets held in cash
    pub allocation: f64,
}

/// Per-position line of a portfolio analysis, in the account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBreakdown {
    pub symbol: String,
    pub name: String,
    pub market: Market,
    pub quantity: f64,
    pub average_cost: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    /// Fraction of total assets held in this position
    pub weight: f64,
}

/// Full analysis returned for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAnalysis {
    pub account_id: Uuid,
    pub currency: String,
    pub cash_asset: CashAsset,
    /// Sorted by market value, largest first
    pub asset_breakdown: Vec<AssetBreakdown>,
    pub portfolio_metrics: PortfolioMetrics,
    pub advice: Vec<AllocationAdvice>,
}

/// Structured company/instrument record for the agent tool layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub asset: AssetMeta,
    pub last_close: Option<f64>,
    pub last_close_date: Option<NaiveDate>,
    /// Highest high over the trailing 52 weeks of stored prices
    pub high_52w: Option<f64>,
    /// Lowest low over the trailing 52 weeks of stored prices
    pub low_52w: Option<f64>,
    pub stored_price_points: usize,
    /// Linked information items that finished processing
    pub processed_info_count: usize,
    /// Mean sentiment score of linked processed items
    pub average_sentiment: Option<f64>,
}
