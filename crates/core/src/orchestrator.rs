// crates/core/src/orchestrator.rs
//! Sequential stage pipeline producing a lazy event stream.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;

use crate::event::{ErrorKind, Event};
use crate::stage::{Stage, StageContext};
use crate::token::CancellationToken;

/// Lazy, finite sequence of events produced by one pipeline run.
///
/// Pull-based: work happens only while the consumer is waiting on
/// `next()`. After the terminal event the stream yields `None` forever.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Runs an ordered stage pipeline for a single request.
///
/// Stages execute strictly in the order given, one at a time. Each stage
/// sees the outputs of every stage before it through the shared context.
pub struct Orchestrator {
    stages: Vec<Arc<dyn Stage>>,
}

impl Orchestrator {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }

    /// Execute the pipeline for one request, returning its event stream.
    ///
    /// The stream is lazy: a stage runs only during the poll that reports
    /// it. Event grammar, in order:
    ///
    /// - zero or more `Progress`, one per completed stage, carrying that
    ///   stage's message and the strictly increasing fraction
    ///   `(index + 1) / total`;
    /// - exactly one terminal event: `Result` with the aggregated stage
    ///   outputs once every stage completed, or `Error` when a stage failed
    ///   or cancellation was observed at a stage boundary.
    ///
    /// Cancellation is checked before each stage, never mid-stage. A stage
    /// that fails after the token flipped mid-run still reports
    /// `StageFailure`; the flag would only have been seen at the next
    /// boundary. An empty pipeline yields a `Result` with no outputs.
    pub fn run(&self, request: serde_json::Value, token: CancellationToken) -> EventStream {
        let stages = self.stages.clone();
        let total = stages.len();

        Box::pin(async_stream::stream! {
            let mut ctx = StageContext::new(request);

            for (index, stage) in stages.iter().enumerate() {
                // Stage boundary: the only point where cancellation takes
                // effect.
                if token.is_cancelled() {
                    tracing::info!(
                        stage = stage.name(),
                        completed = index,
                        total,
                        "run cancelled at stage boundary"
                    );
                    yield Event::Error {
                        kind: ErrorKind::Cancelled,
                        message: "Analysis cancelled before completion".to_string(),
                    };
                    return;
                }

                tracing::debug!(stage = stage.name(), index, total, "executing stage");
                match stage.evaluate(&ctx).await {
                    Ok(output) => {
                        ctx.record(stage.name(), output.data);
                        yield Event::Progress {
                            stage: stage.name().to_string(),
                            message: output.message,
                            progress: (index + 1) as f64 / total as f64,
                        };
                    }
                    Err(err) => {
                        tracing::warn!(stage = stage.name(), error = %err, "stage failed");
                        yield Event::Error {
                            kind: ErrorKind::StageFailure,
                            message: err.message,
                        };
                        return;
                    }
                }
            }

            yield Event::Result {
                data: ctx.into_aggregate(),
            };
        })
    }
}
