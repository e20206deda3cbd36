// crates/stages/src/deep_value.rs
//! Deep-value contrarian analyst.
//!
//! Scores each ticker on free-cash-flow yield, EV/EBIT, balance-sheet
//! strength, and negative press as a contrarian tailwind, then maps the
//! total to a bullish/bearish/neutral signal.

use async_trait::async_trait;
use serde_json::{Map, Value};

use quantline_core::{Stage, StageContext, StageError, StageOutput};

use crate::metrics::{self, FinancialSnapshot};
use crate::signal::{Signal, TickerSignal};

const VALUE_MAX: u32 = 6;
const BALANCE_SHEET_MAX: u32 = 3;
const CONTRARIAN_MAX: u32 = 1;

/// Emits a per-ticker signal map under the `deep_value` key.
pub struct DeepValueStage;

#[async_trait]
impl Stage for DeepValueStage {
    fn name(&self) -> &str {
        "deep_value"
    }

    async fn evaluate(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let request = ctx.request();
        let mut signals = Map::new();

        for ticker in metrics::tickers(request) {
            let snapshot = metrics::snapshot_for(request, &ticker);
            let verdict = score_ticker(&snapshot);
            tracing::debug!(ticker = %ticker, signal = ?verdict.signal, "deep value verdict");

            let encoded = serde_json::to_value(&verdict).map_err(|err| {
                StageError::new(format!("Failed to encode {ticker} signal: {err}"))
            })?;
            signals.insert(ticker, encoded);
        }

        Ok(StageOutput::new(
            "Completed deep_value analysis",
            Value::Object(signals),
        ))
    }
}

fn score_ticker(snapshot: &FinancialSnapshot) -> TickerSignal {
    let (value_score, mut details) = analyze_value(snapshot);
    let (balance_score, balance_details) = analyze_balance_sheet(snapshot);
    let (contrarian_score, contrarian_details) = analyze_contrarian(snapshot);
    details.extend(balance_details);
    details.extend(contrarian_details);

    let score = value_score + balance_score + contrarian_score;
    let max_score = VALUE_MAX + BALANCE_SHEET_MAX + CONTRARIAN_MAX;

    TickerSignal {
        signal: Signal::from_score(score.into(), max_score.into()),
        confidence: f64::from(score) / f64::from(max_score) * 100.0,
        reasoning: details.join("; "),
    }
}

/// Free-cash-flow yield and EV/EBIT. Worth up to `VALUE_MAX` points.
fn analyze_value(snapshot: &FinancialSnapshot) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut details = Vec::new();

    match (snapshot.free_cash_flow, snapshot.market_cap) {
        (Some(fcf), Some(cap)) if cap > 0.0 => {
            let fcf_yield = fcf / cap;
            let pct = fcf_yield * 100.0;
            if fcf_yield >= 0.15 {
                score += 4;
                details.push(format!("Extraordinary FCF yield {pct:.1}%"));
            } else if fcf_yield >= 0.12 {
                score += 3;
                details.push(format!("Very high FCF yield {pct:.1}%"));
            } else if fcf_yield >= 0.08 {
                score += 2;
                details.push(format!("Respectable FCF yield {pct:.1}%"));
            } else {
                details.push(format!("Low FCF yield {pct:.1}%"));
            }
        }
        _ => details.push("FCF data unavailable".to_string()),
    }

    match snapshot.ev_to_ebit {
        Some(ev_ebit) if ev_ebit < 6.0 => {
            score += 2;
            details.push(format!("EV/EBIT {ev_ebit:.1} (<6)"));
        }
        Some(ev_ebit) if ev_ebit < 10.0 => {
            score += 1;
            details.push(format!("EV/EBIT {ev_ebit:.1} (<10)"));
        }
        Some(ev_ebit) => details.push(format!("High EV/EBIT {ev_ebit:.1}")),
        None => details.push("EV/EBIT data unavailable".to_string()),
    }

    (score, details)
}

/// Leverage and liquidity checks. Worth up to `BALANCE_SHEET_MAX` points.
fn analyze_balance_sheet(snapshot: &FinancialSnapshot) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut details = Vec::new();

    match snapshot.debt_to_equity {
        Some(de) if de < 0.5 => {
            score += 2;
            details.push(format!("Low D/E {de:.2}"));
        }
        Some(de) if de < 1.0 => {
            score += 1;
            details.push(format!("Moderate D/E {de:.2}"));
        }
        Some(de) => details.push(format!("High leverage D/E {de:.2}")),
        None => details.push("Debt-to-equity data unavailable".to_string()),
    }

    match (snapshot.cash_and_equivalents, snapshot.total_debt) {
        (Some(cash), Some(debt)) => {
            if cash > debt {
                score += 1;
                details.push("Net cash position".to_string());
            } else {
                details.push("Net debt position".to_string());
            }
        }
        _ => details.push("Cash/debt data unavailable".to_string()),
    }

    (score, details)
}

/// A wall of negative headlines reads as opportunity here, not risk.
/// Worth up to `CONTRARIAN_MAX` points.
fn analyze_contrarian(snapshot: &FinancialSnapshot) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut details = Vec::new();

    match snapshot.negative_news_count {
        Some(count) if count >= 5 => {
            score += 1;
            details.push(format!("{count} negative headlines (contrarian opportunity)"));
        }
        Some(_) => details.push("Limited negative press".to_string()),
        None => details.push("No recent news".to_string()),
    }

    (score, details)
}
