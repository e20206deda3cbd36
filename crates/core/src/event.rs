// crates/core/src/event.rs
//! Events produced by a pipeline run.

use serde::{Deserialize, Serialize};

/// Terminal error kinds.
///
/// `StageFailure` and `Cancelled` are mutually exclusive outcomes of a run:
/// a cancellation observed at a stage boundary reports `Cancelled`, while a
/// stage that fails after starting reports `StageFailure` even if
/// cancellation arrived during its execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StageFailure,
    Cancelled,
}

/// One item of a run's output sequence.
///
/// Every run yields zero or more `Progress` events followed by exactly one
/// terminal event (`Result` or `Error`), then nothing further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A stage completed. `progress` is the completed fraction of the
    /// pipeline, strictly increasing across the run, in `(0, 1]`.
    Progress {
        stage: String,
        message: String,
        progress: f64,
    },
    /// All stages completed; `data` aggregates their outputs.
    Result { data: serde_json::Value },
    /// The run ended early.
    Error { kind: ErrorKind, message: String },
}

impl Event {
    /// Whether this event ends the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Result { .. } | Event::Error { .. })
    }
}
