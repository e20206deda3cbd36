// crates/stages/src/signal.rs
//! Shared signal vocabulary for analyst stages.

use serde::{Deserialize, Serialize};

/// Direction of an analyst's view on one ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Bullish,
    Bearish,
    Neutral,
}

impl Signal {
    /// Map a score against its maximum to a direction. Scores at or above
    /// 70% of the maximum read bullish, at or below 30% bearish.
    pub fn from_score(score: f64, max_score: f64) -> Self {
        if score >= 0.7 * max_score {
            Signal::Bullish
        } else if score <= 0.3 * max_score {
            Signal::Bearish
        } else {
            Signal::Neutral
        }
    }
}

/// One analyst's verdict on one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSignal {
    pub signal: Signal,
    /// 0 to 100.
    pub confidence: f64,
    pub reasoning: String,
}
