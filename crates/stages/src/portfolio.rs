// crates/stages/src/portfolio.rs
//! Final trading decision from analyst consensus and risk limits.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use quantline_core::{Stage, StageContext, StageError, StageOutput};

use crate::metrics;
use crate::signal::{Signal, TickerSignal};

/// What to do with one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Short,
    Hold,
}

/// Sized trading decision for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub quantity: u64,
    pub confidence: f64,
    pub reasoning: String,
}

/// Shape the risk stage records per ticker.
#[derive(Debug, Deserialize)]
struct RiskLimit {
    remaining_position_limit: f64,
    current_price: Option<f64>,
}

/// Weighs every analyst signal recorded before it, sizes the winning side
/// within the risk limits, and emits a per-ticker decision map.
pub struct PortfolioDecisionStage;

#[async_trait]
impl Stage for PortfolioDecisionStage {
    fn name(&self) -> &str {
        "portfolio_decision"
    }

    async fn evaluate(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let request = ctx.request();
        let margin_requirement = metrics::margin_requirement(request);

        let limits = parse_limits(ctx)?;
        let signals = collect_signals(ctx);

        let mut decisions = Map::new();
        for ticker in metrics::tickers(request) {
            let ticker_signals = signals.get(&ticker).map(Vec::as_slice).unwrap_or(&[]);
            let decision = decide(ticker_signals, limits.get(&ticker), margin_requirement);
            tracing::debug!(
                ticker = %ticker,
                action = ?decision.action,
                quantity = decision.quantity,
                "portfolio decision"
            );

            let encoded = serde_json::to_value(&decision).map_err(|err| {
                StageError::new(format!("Failed to encode {ticker} decision: {err}"))
            })?;
            decisions.insert(ticker, encoded);
        }

        Ok(StageOutput::new(
            "Completed portfolio management",
            Value::Object(decisions),
        ))
    }
}

fn parse_limits(ctx: &StageContext) -> Result<HashMap<String, RiskLimit>, StageError> {
    let raw = ctx
        .output("risk_management")
        .ok_or_else(|| StageError::new("Risk limits unavailable; run risk_management first"))?;
    serde_json::from_value(raw.clone())
        .map_err(|err| StageError::new(format!("Malformed risk limits: {err}")))
}

/// Gather analyst verdicts by ticker. Any completed stage whose output
/// parses as a per-ticker signal map counts as an analyst; everything else
/// (the risk limits, for one) fails the parse and is skipped.
fn collect_signals(ctx: &StageContext) -> HashMap<String, Vec<TickerSignal>> {
    let mut by_ticker: HashMap<String, Vec<TickerSignal>> = HashMap::new();
    for value in ctx.outputs().values() {
        if let Ok(signals) = serde_json::from_value::<HashMap<String, TickerSignal>>(value.clone())
        {
            for (ticker, signal) in signals {
                by_ticker.entry(ticker).or_default().push(signal);
            }
        }
    }
    by_ticker
}

fn decide(signals: &[TickerSignal], limit: Option<&RiskLimit>, margin_requirement: f64) -> Decision {
    if signals.is_empty() {
        return hold(0.0, "No analyst signals available".to_string());
    }

    let bullish: Vec<f64> = confidences(signals, Signal::Bullish);
    let bearish: Vec<f64> = confidences(signals, Signal::Bearish);
    let bull_weight: f64 = bullish.iter().sum();
    let bear_weight: f64 = bearish.iter().sum();

    if bull_weight > bear_weight {
        let confidence = bull_weight / bullish.len() as f64;
        let consensus = format!(
            "Bullish consensus from {} of {} analysts",
            bullish.len(),
            signals.len()
        );
        size_long(limit, confidence, consensus)
    } else if bear_weight > bull_weight {
        let confidence = bear_weight / bearish.len() as f64;
        let consensus = format!(
            "Bearish consensus from {} of {} analysts",
            bearish.len(),
            signals.len()
        );
        size_short(limit, margin_requirement, confidence, consensus)
    } else {
        hold(0.0, "No directional consensus".to_string())
    }
}

fn size_long(limit: Option<&RiskLimit>, confidence: f64, consensus: String) -> Decision {
    match priced_limit(limit) {
        Some((cap, price)) => {
            let quantity = (cap / price).floor() as u64;
            if quantity == 0 {
                return hold(
                    confidence,
                    format!("{consensus}, but the position limit cannot cover one share"),
                );
            }
            Decision {
                action: Action::Buy,
                quantity,
                confidence,
                reasoning: consensus,
            }
        }
        None => hold(confidence, format!("{consensus}, but no price data")),
    }
}

fn size_short(
    limit: Option<&RiskLimit>,
    margin_requirement: f64,
    confidence: f64,
    consensus: String,
) -> Decision {
    if margin_requirement <= 0.0 {
        return hold(confidence, format!("{consensus}, but shorting is disabled"));
    }
    match priced_limit(limit) {
        Some((cap, price)) => {
            // Each shorted share consumes price * margin_requirement of the
            // position limit as margin.
            let quantity = (cap / (price * margin_requirement)).floor() as u64;
            if quantity == 0 {
                return hold(
                    confidence,
                    format!("{consensus}, but the position limit cannot cover one share"),
                );
            }
            Decision {
                action: Action::Short,
                quantity,
                confidence,
                reasoning: consensus,
            }
        }
        None => hold(confidence, format!("{consensus}, but no price data")),
    }
}

fn priced_limit(limit: Option<&RiskLimit>) -> Option<(f64, f64)> {
    let limit = limit?;
    let price = limit.current_price?;
    if price > 0.0 {
        Some((limit.remaining_position_limit, price))
    } else {
        None
    }
}

fn confidences(signals: &[TickerSignal], direction: Signal) -> Vec<f64> {
    signals
        .iter()
        .filter(|s| s.signal == direction)
        .map(|s| s.confidence)
        .collect()
}

fn hold(confidence: f64, reasoning: String) -> Decision {
    Decision {
        action: Action::Hold,
        quantity: 0,
        confidence,
        reasoning,
    }
}
