// crates/stages/src/metrics.rs
//! Read access to the request payload the orchestrator hands each stage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Point-in-time financial metrics for one ticker, supplied by the caller
/// under `metrics.<TICKER>` in the analysis request.
///
/// Every field is optional; stages treat a missing value as data
/// unavailable rather than an error, and score accordingly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialSnapshot {
    pub free_cash_flow: Option<f64>,
    pub market_cap: Option<f64>,
    pub ev_to_ebit: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub cash_and_equivalents: Option<f64>,
    pub total_debt: Option<f64>,
    pub operating_margin: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub share_price: Option<f64>,
    pub negative_news_count: Option<u64>,
}

/// Snapshot for `ticker`, or an empty one when the request carries no
/// metrics for it.
pub fn snapshot_for(request: &Value, ticker: &str) -> FinancialSnapshot {
    match request.get("metrics").and_then(|m| m.get(ticker)) {
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|err| {
            tracing::warn!(ticker, error = %err, "malformed metrics entry, treating as empty");
            FinancialSnapshot::default()
        }),
        None => FinancialSnapshot::default(),
    }
}

/// Tickers listed in the request, in request order.
pub fn tickers(request: &Value) -> Vec<String> {
    request
        .get("tickers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Cash the portfolio starts with.
pub fn portfolio_cash(request: &Value) -> f64 {
    request
        .get("portfolio")
        .and_then(|p| p.get("cash"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Margin multiple required to hold a short position. Zero means shorting
/// is disabled.
pub fn margin_requirement(request: &Value) -> f64 {
    request
        .get("portfolio")
        .and_then(|p| p.get("margin_requirement"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}
