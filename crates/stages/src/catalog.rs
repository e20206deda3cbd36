// crates/stages/src/catalog.rs
//! Maps analyst keys to stages and assembles the pipeline for one run.

use std::sync::Arc;

use quantline_core::Stage;
use thiserror::Error;

use crate::deep_value::DeepValueStage;
use crate::portfolio::PortfolioDecisionStage;
use crate::quality::QualityStage;
use crate::risk::RiskManagementStage;

/// Analyst keys accepted in `selected_analysts`.
pub const ANALYSTS: &[&str] = &["deep_value", "quality"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown analyst: {0}")]
    UnknownAnalyst(String),
}

/// True if `key` names a built-in analyst.
pub fn is_known_analyst(key: &str) -> bool {
    ANALYSTS.contains(&key)
}

/// Every analyst key, for requests that do not narrow the selection.
pub fn default_analysts() -> Vec<String> {
    ANALYSTS.iter().map(|key| key.to_string()).collect()
}

fn analyst_stage(key: &str) -> Option<Arc<dyn Stage>> {
    match key {
        "deep_value" => Some(Arc::new(DeepValueStage)),
        "quality" => Some(Arc::new(QualityStage)),
        _ => None,
    }
}

/// Assemble the stage pipeline for one request: the selected analysts in
/// selection order (first occurrence wins), then risk management, then the
/// final portfolio decision.
pub fn build_pipeline(selected: &[String]) -> Result<Vec<Arc<dyn Stage>>, CatalogError> {
    let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(selected.len() + 2);
    let mut seen: Vec<&str> = Vec::new();

    for key in selected {
        if seen.contains(&key.as_str()) {
            continue;
        }
        let stage =
            analyst_stage(key).ok_or_else(|| CatalogError::UnknownAnalyst(key.clone()))?;
        stages.push(stage);
        seen.push(key);
    }

    stages.push(Arc::new(RiskManagementStage));
    stages.push(Arc::new(PortfolioDecisionStage));
    Ok(stages)
}
