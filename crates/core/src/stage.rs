// crates/core/src/stage.rs
//! Stage capability implemented by each unit of pipeline work.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StageError;

/// One unit of pipeline work.
///
/// Implementations are opaque to the orchestrator: they read the request and
/// the outputs of previously completed stages from the context, and either
/// contribute output or fail with a message. Stages may perform arbitrary
/// external work; retries and timeouts are their own responsibility.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, used in progress events and as the key for this stage's
    /// contribution in the aggregated result.
    fn name(&self) -> &str;

    /// Execute the stage against the shared context.
    async fn evaluate(&self, ctx: &StageContext) -> Result<StageOutput, StageError>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name()).finish()
    }
}

/// Successful contribution of one stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Human-readable completion message, surfaced in the progress event.
    pub message: String,
    /// The stage's contribution to the aggregated result.
    pub data: Value,
}

impl StageOutput {
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// Shared input for one pipeline run.
///
/// Stages receive a shared reference and can only read; the orchestrator
/// owns the context and records each completed stage's output before the
/// next stage runs.
#[derive(Debug, Clone)]
pub struct StageContext {
    request: Value,
    outputs: Map<String, Value>,
}

impl StageContext {
    /// Create a context around an opaque request payload.
    pub fn new(request: Value) -> Self {
        Self {
            request,
            outputs: Map::new(),
        }
    }

    /// The request payload this run was started with.
    pub fn request(&self) -> &Value {
        &self.request
    }

    /// Output recorded for `stage`, if it has completed.
    pub fn output(&self, stage: &str) -> Option<&Value> {
        self.outputs.get(stage)
    }

    /// All outputs recorded so far, keyed by stage name.
    pub fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    /// Record a completed stage's contribution.
    pub fn record(&mut self, stage: &str, data: Value) {
        self.outputs.insert(stage.to_string(), data);
    }

    /// Consume the context into the aggregated result, keyed by stage name.
    pub fn into_aggregate(self) -> Value {
        Value::Object(self.outputs)
    }
}
