// crates/server/src/routes/mcp.rs
//! MCP notification endpoint.
//!
//! Accepts JSON-RPC 2.0 notifications from MCP clients. The only method
//! handled is `notifications/cancelled`, which maps onto the registry's
//! cancel operation. Notifications are acknowledged with 202 and an
//! empty body, per the MCP convention.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;

use crate::error::ErrorResponse;
use crate::state::AppState;

/// Create the MCP routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/mcp/notification", post(mcp_notification))
}

/// POST /api/mcp/notification - Handle a JSON-RPC notification.
pub async fn mcp_notification(
    State(state): State<Arc<AppState>>,
    Json(data): Json<Value>,
) -> Response {
    if data.get("jsonrpc").is_none() || data.get("method").is_none() {
        return bad_request("Invalid JSON-RPC format");
    }
    if data["jsonrpc"] != "2.0" {
        return bad_request("Unsupported JSON-RPC version");
    }

    match data["method"].as_str() {
        Some("notifications/cancelled") => {
            let params = data.get("params").cloned().unwrap_or(Value::Null);
            // MCP request ids may be strings or numbers.
            let request_id = match params.get("requestId") {
                Some(Value::String(id)) if !id.is_empty() => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => {
                    return bad_request("Missing requestId in cancellation notification");
                }
            };
            let reason = params
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("Client requested cancellation");

            tracing::info!(
                request_id = %request_id,
                reason = %reason,
                "MCP cancellation notification received"
            );
            if state.registry.cancel(&request_id) {
                tracing::info!(request_id = %request_id, "Request cancelled");
            } else {
                tracing::warn!(request_id = %request_id, "Request not found or already completed");
            }

            StatusCode::ACCEPTED.into_response()
        }
        _ => {
            let method = data["method"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| data["method"].to_string());
            tracing::warn!(method = %method, "Unknown MCP notification method");
            bad_request(&format!("Unknown notification method: {method}"))
        }
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(message)),
    )
        .into_response()
}

// =============================================================================
// Tests
// =============================================================================
