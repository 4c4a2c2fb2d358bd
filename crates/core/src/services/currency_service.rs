use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::settings::currency_code;

/// Converts amounts between currencies at fixed, configured rates.
///
/// Each rate is the USD value of one unit of that currency, so
/// `convert(amount, from, to) = amount * rate[from] / rate[to]`.
/// No live FX data is fetched.
#[derive(Debug, Clone)]
pub struct CurrencyService {
    rates: HashMap<String, f64>,
}

impl CurrencyService {
    pub fn new(rates: &HashMap<String, f64>) -> Self {
        Self {
            rates: rates
                .iter()
                .map(|(code, rate)| (currency_code(code), *rate))
                .collect(),
        }
    }

    /// USD value of one unit of `currency`.
    pub fn usd_rate(&self, currency: &str) -> Result<f64, CoreError> {
        let code = currency_code(currency);
        self.rates
            .get(&code)
            .copied()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(|| CoreError::ValidationError(format!("No exchange rate configured for {code}")))
    }

    /// Convert `amount` from one currency to another.
    /// E.g., convert(100.0, "HKD", "USD") → ~12.8
    pub fn convert(&self, amount: f64, from_currency: &str, to_currency: &str) -> Result<f64, CoreError> {
        if from_currency.eq_ignore_ascii_case(to_currency) {
            return Ok(amount);
        }
        Ok(amount * self.usd_rate(from_currency)? / self.usd_rate(to_currency)?)
    }

    pub fn supports(&self, currency: &str) -> bool {
        self.usd_rate(currency).is_ok()
    }
}

impl Default for CurrencyService {
    fn default() -> Self {
        Self::new(&crate::models::settings::Settings::default().exchange_rates)
    }
}
