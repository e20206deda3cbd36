// crates/core/src/error.rs
use thiserror::Error;

/// Errors returned synchronously by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Request already active: {id}")]
    Conflict { id: String },
}

/// Failure produced by a stage's `evaluate`.
///
/// Carries only the message; the orchestrator converts it into a terminal
/// error event rather than propagating it as a fault.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::Conflict {
            id: "req-1".to_string(),
        };
        assert_eq!(err.to_string(), "Request already active: req-1");
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::new("missing metrics for AAPL");
        assert_eq!(err.to_string(), "missing metrics for AAPL");
    }
}
