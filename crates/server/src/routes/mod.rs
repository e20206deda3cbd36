//! API route handlers for the quantline server.

pub mod analysis;
pub mod health;
pub mod mcp;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET /api/health - Health check
/// - POST /api/analysis/generate - Run the pipeline, stream NDJSON events
/// - POST /api/analysis/email - Run the pipeline, email the final result
/// - POST /api/analysis/cancel/{request_id} - Cancel one run
/// - POST /api/analysis/cancel-all - Cancel every active run
/// - GET /api/analysis/active - Snapshot of active runs
/// - POST /api/mcp/notification - JSON-RPC cancellation notifications
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", analysis::router())
        .nest("/api", mcp::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::ConsoleMailer;

    #[tokio::test]
    async fn test_api_routes_creation() {
        let state = AppState::new(Arc::new(ConsoleMailer::new()));
        let _router = api_routes(state);
    }
}
