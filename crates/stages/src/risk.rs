// crates/stages/src/risk.rs
//! Position-limit sizing ahead of the final decision.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use quantline_core::{Stage, StageContext, StageError, StageOutput};

use crate::metrics;

/// Fraction of portfolio value any single position may consume.
const POSITION_LIMIT_FRACTION: f64 = 0.20;

/// Computes a per-ticker position limit from portfolio cash and passes the
/// current price through for the decision stage.
pub struct RiskManagementStage;

#[async_trait]
impl Stage for RiskManagementStage {
    fn name(&self) -> &str {
        "risk_management"
    }

    async fn evaluate(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let request = ctx.request();
        let cash = metrics::portfolio_cash(request);
        // Fresh portfolio: total value is just the cash.
        let position_limit = POSITION_LIMIT_FRACTION * cash;

        let mut limits = Map::new();
        for ticker in metrics::tickers(request) {
            let snapshot = metrics::snapshot_for(request, &ticker);
            limits.insert(
                ticker,
                json!({
                    "remaining_position_limit": position_limit,
                    "current_price": snapshot.share_price,
                }),
            );
        }

        tracing::debug!(tickers = limits.len(), position_limit, "computed position limits");
        Ok(StageOutput::new(
            "Completed risk management",
            Value::Object(limits),
        ))
    }
}
