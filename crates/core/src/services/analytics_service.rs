use tracing::debug;

use crate::errors::CoreError;
use crate::models::analytics::{
    AdviceCategory, AdvicePriority, Allocation, AllocationAdvice, AllocationBands, AssetBreakdown,
    CashAsset, PortfolioAnalysis, PortfolioMetrics, RiskLevel,
};
use crate::models::portfolio::{Account, Position};
use crate::services::currency_service::CurrencyService;

/// Computes portfolio metrics: allocation, gain, diversification, risk, advice.
///
/// Pure computation over an account snapshot; nothing here reads or writes
/// storage. Positions quoted in another currency are converted into the
/// account currency at the configured fixed rates first.
#[derive(Debug, Clone)]
pub struct AnalyticsService {
    bands: AllocationBands,
    currency_service: CurrencyService,
}

impl AnalyticsService {
    pub fn new(bands: AllocationBands, currency_service: CurrencyService) -> Self {
        Self {
            bands,
            currency_service,
        }
    }

    #[must_use]
    pub fn bands(&self) -> &AllocationBands {
        &self.bands
    }

    /// Full analysis of an account: cash line, per-position breakdown, metrics, advice.
    pub fn analyze(
        &self,
        account: &Account,
        positions: &[Position],
    ) -> Result<PortfolioAnalysis, CoreError> {
        let currency = account.currency.as_str();

        // 1. Value every position in the account currency
        let mut breakdown = Vec::with_capacity(positions.len());
        for position in positions {
            let convert = |amount: f64| {
                self.currency_service
                    .convert(amount, position.currency(), currency)
            };
            let current_price = convert(position.current_price)?;
            let average_cost = convert(position.average_cost)?;
            let market_value = position.quantity * current_price;
            let unrealized_pnl = (current_price - average_cost) * position.quantity;
            let cost = average_cost * position.quantity;

            breakdown.push(AssetBreakdown {
                symbol: position.symbol.clone(),
                name: position.name.clone(),
                market: position.market,
                quantity: position.quantity,
                average_cost,
                current_price,
                market_value,
                unrealized_pnl,
                unrealized_pnl_pct: if cost > 0.0 {
                    unrealized_pnl / cost * 100.0
                } else {
                    0.0
                },
                weight: 0.0, // filled below
            });
        }

        // 2. Portfolio-level metrics
        let metrics = self.compute_metrics(account.cash_balance, &breakdown);

        for line in &mut breakdown {
            line.weight = ratio(line.market_value, metrics.total_assets_value);
        }
        breakdown.sort_by(|a, b| {
            b.market_value
                .partial_cmp(&a.market_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let advice = self.advice_for(&metrics);
        debug!(
            account = %account.id,
            total = metrics.total_assets_value,
            risk = metrics.risk_score,
            "Computed portfolio analysis"
        );

        Ok(PortfolioAnalysis {
            account_id: account.id,
            currency: account.currency.clone(),
            cash_asset: CashAsset {
                balance: account.cash_balance,
                currency: account.currency.clone(),
                allocation: metrics.allocation.cash,
            },
            asset_breakdown: breakdown,
            portfolio_metrics: metrics,
            advice,
        })
    }

    /// Metrics for a cash balance and already-converted holdings.
    #[must_use]
    pub fn compute_metrics(&self, cash_balance: f64, holdings: &[AssetBreakdown]) -> PortfolioMetrics {
        let stock_value: f64 = holdings.iter().map(|h| h.market_value).sum();
        let total_cost: f64 = holdings.iter().map(|h| h.average_cost * h.quantity).sum();
        let stock_gain: f64 = holdings.iter().map(|h| h.unrealized_pnl).sum();
        let total_assets_value = cash_balance + stock_value;

        // 0/0 → 0 by convention
        let allocation = Allocation {
            stock: ratio(stock_value, total_assets_value),
            cash: ratio(cash_balance, total_assets_value),
        };

        let weights: Vec<f64> = holdings
            .iter()
            .map(|h| ratio(h.market_value, stock_value))
            .collect();
        let largest_position_weight = weights.iter().copied().fold(0.0, f64::max);
        let diversification_score = diversification_score(&weights);

        let mut metrics = PortfolioMetrics {
            total_assets_value,
            total_cost,
            stock_value,
            stock_gain,
            allocation,
            position_count: holdings.len(),
            largest_position_weight,
            diversification_score,
            risk_score: 0.0,
            risk_level: RiskLevel::Low,
        };
        let (risk_score, risk_level) = self.calculate_risk_score(&metrics);
        metrics.risk_score = risk_score;
        metrics.risk_level = risk_level;
        metrics
    }

    /// Risk score in `[0, 100]` and its level.
    ///
    /// `stock_weight_factor * stock% + diversification_weight_factor * (100 - diversification)`,
    /// clamped; an account without positions carries no market risk.
    #[must_use]
    pub fn calculate_risk_score(&self, metrics: &PortfolioMetrics) -> (f64, RiskLevel) {
        if metrics.position_count == 0 {
            return (0.0, RiskLevel::Low);
        }
        let score = (self.bands.stock_weight_factor * metrics.allocation.stock * 100.0
            + self.bands.diversification_weight_factor
                * (100.0 - metrics.diversification_score))
            .clamp(0.0, 100.0);

        let level = if score >= self.bands.high_risk_threshold {
            RiskLevel::High
        } else if score >= self.bands.medium_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        (score, level)
    }

    /// Advice from comparing an allocation to the target stock band.
    #[must_use]
    pub fn get_allocation_advice(&self, allocation: &Allocation) -> Vec<AllocationAdvice> {
        let bands = &self.bands;
        let stock_pct = allocation.stock * 100.0;
        let mut advice = Vec::new();

        if allocation.stock == 0.0 && allocation.cash == 0.0 {
            advice.push(AllocationAdvice {
                category: AdviceCategory::General,
                priority: AdvicePriority::Low,
                message: "Portfolio is empty; deposit cash to get started.".to_string(),
            });
        } else if allocation.stock > bands.stock_target_max {
            advice.push(AllocationAdvice {
                category: AdviceCategory::Rebalance,
                priority: band_priority(allocation.stock - bands.stock_target_max),
                message: format!(
                    "Stock allocation {stock_pct:.1}% exceeds the {:.0}% target; rebalance toward cash.",
                    bands.stock_target_max * 100.0
                ),
            });
        } else if allocation.stock < bands.stock_target_min {
            advice.push(AllocationAdvice {
                category: AdviceCategory::Rebalance,
                priority: band_priority(bands.stock_target_min - allocation.stock),
                message: format!(
                    "Stock allocation {stock_pct:.1}% is below the {:.0}% target; consider investing idle cash.",
                    bands.stock_target_min * 100.0
                ),
            });
        } else {
            advice.push(AllocationAdvice {
                category: AdviceCategory::General,
                priority: AdvicePriority::Low,
                message: format!(
                    "Stock allocation {stock_pct:.1}% is within the {:.0}%-{:.0}% target band.",
                    bands.stock_target_min * 100.0,
                    bands.stock_target_max * 100.0
                ),
            });
        }
        advice
    }

    /// Allocation advice plus concentration and diversification checks.
    #[must_use]
    pub fn advice_for(&self, metrics: &PortfolioMetrics) -> Vec<AllocationAdvice> {
        let mut advice = self.get_allocation_advice(&metrics.allocation);
        if metrics.position_count == 0 {
            return advice;
        }

        if metrics.largest_position_weight > self.bands.max_single_position_weight {
            advice.push(AllocationAdvice {
                category: AdviceCategory::Concentration,
                priority: if metrics.largest_position_weight >= 0.7 {
                    AdvicePriority::High
                } else {
                    AdvicePriority::Medium
                },
                message: format!(
                    "Largest position is {:.1}% of stock holdings (limit {:.0}%); consider trimming it.",
                    metrics.largest_position_weight * 100.0,
                    self.bands.max_single_position_weight * 100.0
                ),
            });
        }
        if metrics.diversification_score < self.bands.min_diversification_score {
            advice.push(AllocationAdvice {
                category: AdviceCategory::Diversification,
                priority: AdvicePriority::Medium,
                message: format!(
                    "Diversification score {:.0}/100 is low with {} position(s); add holdings to spread risk.",
                    metrics.diversification_score, metrics.position_count
                ),
            });
        }
        advice
    }
}

/// Diversification score in `[0, 100]` from position weights (summing to 1).
///
/// Averages `1 - HHI` (Herfindahl index, falls with position count) and
/// `1 - max_weight` (falls with concentration). One position scores 0;
/// `n` equal positions score `100 * (1 - 1/n)`.
#[must_use]
pub fn diversification_score(weights: &[f64]) -> f64 {
    if weights.is_empty() {
        return 0.0;
    }
    let hhi: f64 = weights.iter().map(|w| w * w).sum();
    let max_weight = weights.iter().copied().fold(0.0, f64::max);
    (100.0 * ((1.0 - hhi) + (1.0 - max_weight)) / 2.0).clamp(0.0, 100.0)
}

fn ratio(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        part / total
    } else {
        0.0
    }
}

fn band_priority(deviation: f64) -> AdvicePriority {
    if deviation >= 0.2 {
        AdvicePriority::High
    } else if deviation >= 0.1 {
        AdvicePriority::Medium
    } else {
        AdvicePriority::Low
    }
}
