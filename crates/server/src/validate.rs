// crates/server/src/validate.rs
//! Request DTOs and business-rule validation for the analysis routes.
//!
//! Validation collects every violation instead of stopping at the first,
//! so a client can fix a bad request in one round trip.

use chrono::{Duration, NaiveDate, Utc};
use quantline_stages::catalog;
use serde::Deserialize;
use serde_json::{json, Value};

const MAX_TICKERS: usize = 50;
const MAX_TICKER_CHARS: usize = 10;
const MAX_REQUEST_ID_CHARS: usize = 64;
const MAX_RANGE_DAYS: i64 = 1825;
const MAX_INITIAL_CASH: f64 = 1_000_000_000.0;
const MAX_FUTURE_DAYS: i64 = 30;
const MAX_PAST_DAYS: i64 = 365 * 20;
const DEFAULT_LOOKBACK_DAYS: i64 = 90;

fn default_initial_cash() -> f64 {
    100_000.0
}

/// Body of `POST /api/analysis/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    /// Ticker symbols to analyze. Results are keyed by these.
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default = "default_initial_cash")]
    pub initial_cash: f64,
    #[serde(default)]
    pub margin_requirement: f64,
    /// Analyst catalog keys to run. Omitted means every analyst.
    #[serde(default)]
    pub selected_analysts: Option<Vec<String>>,
    /// Caller-supplied portfolio; overrides `initial_cash` and
    /// `margin_requirement` when present.
    #[serde(default)]
    pub portfolio: Option<Value>,
    /// Per-ticker financial metrics, keyed by ticker symbol.
    #[serde(default)]
    pub metrics: Option<Value>,
    /// Caller-chosen request id; the server generates one when omitted.
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Body of `POST /api/analysis/email`: an analysis request plus the
/// destination address.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailAnalysisRequest {
    #[serde(flatten)]
    pub analysis: AnalysisRequest,
    #[serde(default)]
    pub email: Option<String>,
}

/// Check business rules, collecting every violation.
pub fn validate(req: &AnalysisRequest) -> Vec<String> {
    let mut errors = Vec::new();

    if req.tickers.is_empty() {
        errors.push("At least one ticker must be provided".to_string());
    }
    if req.tickers.len() > MAX_TICKERS {
        errors.push("Too many tickers provided (max 50)".to_string());
    }
    for ticker in &req.tickers {
        if !is_valid_ticker(ticker) {
            errors.push(format!("Invalid ticker format: {ticker}"));
        }
    }

    let end = match &req.end_date {
        Some(raw) => match parse_date(raw) {
            Some(date) => Some(date),
            None => {
                errors.push("Invalid end_date format. Use YYYY-MM-DD".to_string());
                None
            }
        },
        None => None,
    };
    let start = match &req.start_date {
        Some(raw) => match parse_date(raw) {
            Some(date) => Some(date),
            None => {
                errors.push("Invalid start_date format. Use YYYY-MM-DD".to_string());
                None
            }
        },
        None => None,
    };
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            errors.push("start_date must be before end_date".to_string());
        }
        if (end - start).num_days() > MAX_RANGE_DAYS {
            errors.push("Date range too large (max 5 years)".to_string());
        }
    }

    if req.initial_cash <= 0.0 {
        errors.push("initial_cash must be positive".to_string());
    }
    if req.initial_cash > MAX_INITIAL_CASH {
        errors.push("initial_cash too large (max 1 billion)".to_string());
    }
    if req.margin_requirement < 0.0 {
        errors.push("margin_requirement cannot be negative".to_string());
    }

    if let Some(analysts) = &req.selected_analysts {
        for analyst in analysts {
            if !catalog::is_known_analyst(analyst) {
                errors.push(format!("Invalid analyst: {analyst}"));
            }
        }
    }

    if let Some(id) = &req.request_id {
        if !is_valid_request_id(id) {
            errors.push(
                "Invalid request_id format. Use 1-64 letters, digits, dots, underscores, or hyphens"
                    .to_string(),
            );
        }
    }

    errors
}

/// Fill in missing dates: the end defaults to today, the start to 90 days
/// before the end.
pub fn resolve_dates(req: &AnalysisRequest) -> (String, String) {
    let end = req
        .end_date
        .clone()
        .unwrap_or_else(|| Utc::now().date_naive().format("%Y-%m-%d").to_string());
    let start = match &req.start_date {
        Some(start) => start.clone(),
        None => match NaiveDate::parse_from_str(&end, "%Y-%m-%d") {
            Ok(date) => (date - Duration::days(DEFAULT_LOOKBACK_DAYS))
                .format("%Y-%m-%d")
                .to_string(),
            Err(_) => end.clone(),
        },
    };
    (start, end)
}

/// Assemble the payload the pipeline stages read: tickers, resolved
/// dates, the portfolio, and per-ticker metrics.
pub fn build_run_payload(req: &AnalysisRequest) -> Value {
    let (start_date, end_date) = resolve_dates(req);
    let portfolio = match &req.portfolio {
        Some(portfolio) => portfolio.clone(),
        None => json!({
            "cash": req.initial_cash,
            "margin_requirement": req.margin_requirement,
        }),
    };
    json!({
        "tickers": req.tickers,
        "start_date": start_date,
        "end_date": end_date,
        "portfolio": portfolio,
        "metrics": req.metrics.clone().unwrap_or_else(|| json!({})),
    })
}

/// 1 to 10 characters; letters, digits, dots, and hyphens.
fn is_valid_ticker(ticker: &str) -> bool {
    if ticker.is_empty() || ticker.chars().count() > MAX_TICKER_CHARS {
        return false;
    }
    ticker.chars().all(|c| {
        let upper = c.to_ascii_uppercase();
        upper.is_ascii_uppercase() || upper.is_ascii_digit() || upper == '.' || upper == '-'
    })
}

/// 1 to 64 characters; letters, digits, dots, underscores, and hyphens.
/// The id round-trips through the `X-Request-Id` response header, so the
/// charset must stay inside visible ASCII.
fn is_valid_request_id(id: &str) -> bool {
    if id.is_empty() || id.chars().count() > MAX_REQUEST_ID_CHARS {
        return false;
    }
    id.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Parse `YYYY-MM-DD`, bounded to a sane window: at most 30 days in the
/// future and at most 20 years in the past.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let today = Utc::now().date_naive();
    if date > today + Duration::days(MAX_FUTURE_DAYS) {
        return None;
    }
    if date < today - Duration::days(MAX_PAST_DAYS) {
        return None;
    }
    Some(date)
}
