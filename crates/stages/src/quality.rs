// crates/stages/src/quality.rs
//! Business-quality analyst.
//!
//! Scores margins, revenue growth, and returns on equity. Complements the
//! deep-value view: a cheap business still has to be a good one.

use async_trait::async_trait;
use serde_json::{Map, Value};

use quantline_core::{Stage, StageContext, StageError, StageOutput};

use crate::metrics::{self, FinancialSnapshot};
use crate::signal::{Signal, TickerSignal};

const MAX_SCORE: u32 = 6;

/// Emits a per-ticker signal map under the `quality` key.
pub struct QualityStage;

#[async_trait]
impl Stage for QualityStage {
    fn name(&self) -> &str {
        "quality"
    }

    async fn evaluate(&self, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let request = ctx.request();
        let mut signals = Map::new();

        for ticker in metrics::tickers(request) {
            let snapshot = metrics::snapshot_for(request, &ticker);
            let verdict = score_ticker(&snapshot);
            tracing::debug!(ticker = %ticker, signal = ?verdict.signal, "quality verdict");

            let encoded = serde_json::to_value(&verdict).map_err(|err| {
                StageError::new(format!("Failed to encode {ticker} signal: {err}"))
            })?;
            signals.insert(ticker, encoded);
        }

        Ok(StageOutput::new(
            "Completed quality analysis",
            Value::Object(signals),
        ))
    }
}

fn score_ticker(snapshot: &FinancialSnapshot) -> TickerSignal {
    let mut score = 0;
    let mut details = Vec::new();

    match snapshot.operating_margin {
        Some(margin) if margin >= 0.25 => {
            score += 2;
            details.push(format!("Strong operating margin {:.1}%", margin * 100.0));
        }
        Some(margin) if margin >= 0.15 => {
            score += 1;
            details.push(format!("Decent operating margin {:.1}%", margin * 100.0));
        }
        Some(margin) => details.push(format!("Thin operating margin {:.1}%", margin * 100.0)),
        None => details.push("Operating margin data unavailable".to_string()),
    }

    match snapshot.revenue_growth {
        Some(growth) if growth >= 0.15 => {
            score += 2;
            details.push(format!("Rapid revenue growth {:.1}%", growth * 100.0));
        }
        Some(growth) if growth >= 0.05 => {
            score += 1;
            details.push(format!("Steady revenue growth {:.1}%", growth * 100.0));
        }
        Some(growth) if growth < 0.0 => {
            details.push(format!("Shrinking revenue {:.1}%", growth * 100.0));
        }
        Some(growth) => details.push(format!("Stagnant revenue {:.1}%", growth * 100.0)),
        None => details.push("Revenue growth data unavailable".to_string()),
    }

    match snapshot.return_on_equity {
        Some(roe) if roe >= 0.20 => {
            score += 2;
            details.push(format!("Excellent ROE {:.1}%", roe * 100.0));
        }
        Some(roe) if roe >= 0.10 => {
            score += 1;
            details.push(format!("Solid ROE {:.1}%", roe * 100.0));
        }
        Some(roe) => details.push(format!("Weak ROE {:.1}%", roe * 100.0)),
        None => details.push("ROE data unavailable".to_string()),
    }

    TickerSignal {
        signal: Signal::from_score(score.into(), MAX_SCORE.into()),
        confidence: f64::from(score) / f64::from(MAX_SCORE) * 100.0,
        reasoning: details.join("; "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_compounder_scores_bullish() {
        let snapshot = FinancialSnapshot {
            operating_margin: Some(0.30),
            revenue_growth: Some(0.18),
            return_on_equity: Some(0.25),
            ..FinancialSnapshot::default()
        };

        let verdict = score_ticker(&snapshot);

        assert_eq!(verdict.signal, Signal::Bullish);
        assert_eq!(verdict.confidence, 100.0);
        assert_eq!(
            verdict.reasoning,
            "Strong operating margin 30.0%; Rapid revenue growth 18.0%; Excellent ROE 25.0%"
        );
    }

    #[test]
    fn test_deteriorating_business_scores_bearish() {
        let snapshot = FinancialSnapshot {
            operating_margin: Some(0.05),
            revenue_growth: Some(-0.08),
            return_on_equity: Some(0.03),
            ..FinancialSnapshot::default()
        };

        let verdict = score_ticker(&snapshot);

        assert_eq!(verdict.signal, Signal::Bearish);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reasoning.contains("Thin operating margin 5.0%"));
        assert!(verdict.reasoning.contains("Shrinking revenue -8.0%"));
        assert!(verdict.reasoning.contains("Weak ROE 3.0%"));
    }

    #[test]
    fn test_mixed_quality_scores_neutral() {
        let snapshot = FinancialSnapshot {
            operating_margin: Some(0.18),
            revenue_growth: Some(0.08),
            return_on_equity: Some(0.12),
            ..FinancialSnapshot::default()
        };

        // 1 + 1 + 1 = 3 of 6.
        let verdict = score_ticker(&snapshot);
        assert_eq!(verdict.signal, Signal::Neutral);
        assert_eq!(verdict.confidence, 50.0);
    }

    #[test]
    fn test_missing_data_scores_bearish() {
        let verdict = score_ticker(&FinancialSnapshot::default());

        assert_eq!(verdict.signal, Signal::Bearish);
        assert_eq!(
            verdict.reasoning,
            "Operating margin data unavailable; Revenue growth data unavailable; \
             ROE data unavailable"
        );
    }

    #[tokio::test]
    async fn test_evaluate_emits_signal_per_ticker() {
        let request = json!({
            "tickers": ["MSFT"],
            "metrics": {
                "MSFT": {
                    "operating_margin": 0.42,
                    "revenue_growth": 0.16,
                    "return_on_equity": 0.38
                }
            }
        });
        let ctx = StageContext::new(request);

        let output = QualityStage.evaluate(&ctx).await.unwrap();

        assert_eq!(output.message, "Completed quality analysis");
        assert_eq!(output.data["MSFT"]["signal"], "bullish");
    }
}
