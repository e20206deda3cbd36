// crates/server/src/routes/analysis.rs
//! Analysis run endpoints.
//!
//! - `POST /api/analysis/generate`   — run the pipeline, stream NDJSON events
//! - `POST /api/analysis/email`      — run the pipeline, email the final result
//! - `POST /api/analysis/cancel/{request_id}` — cancel one run
//! - `POST /api/analysis/cancel-all` — cancel every active run
//! - `GET  /api/analysis/active`     — snapshot of active runs

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use quantline_core::{
    Event, EventStream, Orchestrator, RequestId, RequestInfo, RequestRegistry,
};
use quantline_stages::catalog;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use crate::error::{ApiError, ApiResult};
use crate::mailer::OutboundMail;
use crate::state::AppState;
use crate::validate::{build_run_payload, validate, AnalysisRequest, EmailAnalysisRequest};

/// Response for the cancel endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CancelResponse {
    pub message: String,
    pub cancelled: bool,
}

/// Response for the cancel-all endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CancelAllResponse {
    pub message: String,
    pub cancelled_count: usize,
}

/// Response listing currently active runs.
#[derive(Debug, Serialize)]
pub struct ActiveRequestsResponse {
    pub active_requests: Vec<RequestInfo>,
    pub count: usize,
}

/// Response for the email endpoint.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct EmailResponse {
    pub message: String,
}

/// Create the analysis routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analysis/generate", post(generate_analysis))
        .route("/analysis/email", post(email_analysis))
        .route("/analysis/cancel/{request_id}", post(cancel_analysis))
        .route("/analysis/cancel-all", post(cancel_all_analyses))
        .route("/analysis/active", get(active_analyses))
}

// ── Run lifecycle ───────────────────────────────────────────────────────

/// Unregisters a run when dropped, whether the stream ran to completion
/// or the client disconnected mid-stream.
struct ActiveGuard {
    registry: Arc<RequestRegistry>,
    id: RequestId,
}

impl ActiveGuard {
    fn new(registry: Arc<RequestRegistry>, id: RequestId) -> Self {
        Self { registry, id }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

/// Validate the request and start a registered pipeline run. The returned
/// stream is lazy; nothing executes until the consumer polls it.
fn start_run(
    state: &AppState,
    req: &AnalysisRequest,
) -> ApiResult<(RequestId, EventStream, ActiveGuard)> {
    let errors = validate(req);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let analysts = req
        .selected_analysts
        .clone()
        .unwrap_or_else(catalog::default_analysts);
    let stages =
        catalog::build_pipeline(&analysts).map_err(|err| ApiError::BadRequest(err.to_string()))?;

    let (request_id, token) = state.registry.register(req.request_id.clone())?;
    let guard = ActiveGuard::new(state.registry.clone(), request_id.clone());

    tracing::info!(
        request_id = %request_id,
        tickers = req.tickers.len(),
        stages = stages.len(),
        "Analysis run started"
    );

    let orchestrator = Orchestrator::new(stages);
    let events = orchestrator.run(build_run_payload(req), token);
    Ok((request_id, events, guard))
}

/// Drain a run to completion, keeping only the terminal result payload.
/// A run that ends in an error or cancellation yields `None`.
async fn drain_result(request_id: &str, mut events: EventStream) -> Option<Value> {
    let mut result = None;
    while let Some(event) = events.next().await {
        match event {
            Event::Result { data } => result = Some(data),
            Event::Error { kind, message } => {
                tracing::warn!(
                    request_id = %request_id,
                    kind = ?kind,
                    message = %message,
                    "Run ended without a result"
                );
            }
            Event::Progress { .. } => {}
        }
    }
    result
}

/// One NDJSON line for an event, stamped with the emission time.
fn event_line(event: &Event) -> String {
    let mut value = match serde_json::to_value(event) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %err, "Event serialization failed");
            json!({
                "type": "error",
                "kind": "stage_failure",
                "message": "Event serialization failed",
            })
        }
    };
    if let Some(map) = value.as_object_mut() {
        map.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    }
    let mut line = value.to_string();
    line.push('\n');
    line
}

/// Wrap an event stream as an NDJSON response body. The registry guard
/// rides inside the stream so the run stays registered until the body is
/// dropped.
fn ndjson_body(mut events: EventStream, guard: ActiveGuard) -> Body {
    Body::from_stream(async_stream::stream! {
        let _guard = guard;
        while let Some(event) = events.next().await {
            yield Ok::<String, Infallible>(event_line(&event));
        }
    })
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST /api/analysis/generate - Run the pipeline and stream its events.
///
/// Each response line is one JSON event object. The connection stays open
/// until the terminal event; dropping it abandons the remaining stages.
pub async fn generate_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> ApiResult<Response> {
    let (request_id, events, guard) = start_run(&state, &req)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson".to_string()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
            (HeaderName::from_static("x-accel-buffering"), "no".to_string()),
            (HeaderName::from_static("x-request-id"), request_id),
        ],
        ndjson_body(events, guard),
    )
        .into_response())
}

/// POST /api/analysis/email - Run the pipeline and email the result.
///
/// Drains the whole event stream internally, keeping only the terminal
/// result payload. A run that ends in an error or cancellation produces
/// no result and reports a 500.
pub async fn email_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailAnalysisRequest>,
) -> ApiResult<Json<EmailResponse>> {
    let to = match &req.email {
        Some(email) if !email.trim().is_empty() => email.clone(),
        _ => return Err(ApiError::BadRequest("Missing email field".to_string())),
    };

    let (request_id, events, _guard) = start_run(&state, &req.analysis)?;
    let data = drain_result(&request_id, events)
        .await
        .ok_or(ApiError::NoResult)?;

    let mail = render_result_mail(&to, &req.analysis.tickers, &data);
    state.mailer.send(&mail).await?;

    tracing::info!(request_id = %request_id, to = %to, "Analysis result emailed");
    Ok(Json(EmailResponse {
        message: "Analysis generated and emailed successfully".to_string(),
    }))
}

/// POST /api/analysis/cancel/{request_id} - Request cancellation of a run.
///
/// Flips the run's token; the run observes it at the next stage boundary
/// and unregisters itself when it terminates.
pub async fn cancel_analysis(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> (StatusCode, Json<CancelResponse>) {
    if state.registry.cancel(&request_id) {
        tracing::info!(request_id = %request_id, "Cancellation requested");
        (
            StatusCode::OK,
            Json(CancelResponse {
                message: format!("Request {request_id} cancelled successfully"),
                cancelled: true,
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(CancelResponse {
                message: format!("Request {request_id} not found or already completed"),
                cancelled: false,
            }),
        )
    }
}

/// POST /api/analysis/cancel-all - Cancel every active run.
pub async fn cancel_all_analyses(
    State(state): State<Arc<AppState>>,
) -> Json<CancelAllResponse> {
    let count = state.registry.cancel_all();
    Json(CancelAllResponse {
        message: format!("Cancelled {count} active requests"),
        cancelled_count: count,
    })
}

/// GET /api/analysis/active - Snapshot of currently active runs.
pub async fn active_analyses(
    State(state): State<Arc<AppState>>,
) -> Json<ActiveRequestsResponse> {
    let active_requests = state.registry.snapshot();
    let count = active_requests.len();
    Json(ActiveRequestsResponse {
        active_requests,
        count,
    })
}

/// Render the result payload as an email: pretty-printed JSON text with a
/// `<pre>`-wrapped HTML alternative.
fn render_result_mail(to: &str, tickers: &[String], data: &Value) -> OutboundMail {
    let text_body = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
    OutboundMail {
        to: to.to_string(),
        subject: format!("Analysis Result for {}", tickers.join(", ")),
        html_body: Some(format!("<pre>{text_body}</pre>")),
        text_body,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::http::Request;
    use quantline_core::{CancellationToken, Stage, StageContext, StageError, StageOutput};
    use tower::ServiceExt;

    use crate::create_app;
    use crate::mailer::{ConsoleMailer, MailError, Mailer};

    /// Captures sent mail for assertions.
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutboundMail>>,
    }

    #[async_trait::async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutboundMail) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    /// Always fails, to exercise the delivery-error path.
    struct FailingMailer;

    #[async_trait::async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _mail: &OutboundMail) -> Result<(), MailError> {
            Err(MailError::Api {
                status: 401,
                body: "denied".to_string(),
            })
        }
    }

    /// Fails on evaluate, for exercising error-terminated runs.
    struct DoomedStage;

    #[async_trait::async_trait]
    impl Stage for DoomedStage {
        fn name(&self) -> &str {
            "doomed"
        }

        async fn evaluate(&self, _ctx: &StageContext) -> Result<StageOutput, StageError> {
            Err(StageError::new("market data unavailable"))
        }
    }

    fn test_state() -> Arc<AppState> {
        AppState::new(Arc::new(ConsoleMailer::new()))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_generate_streams_ndjson_events() {
        let app = create_app(test_state());
        let response = app
            .oneshot(post_json(
                "/api/analysis/generate",
                r#"{"tickers": ["AAPL"], "metrics": {"AAPL": {"share_price": 180.0}}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(content_type, "application/x-ndjson");
        assert!(response.headers().get("x-request-id").is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // Two analysts, risk management, portfolio decision, then the result.
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["type"], "progress");
        assert_eq!(lines[0]["stage"], "deep_value");
        assert_eq!(lines[0]["progress"], json!(0.25));
        assert_eq!(lines[3]["progress"], json!(1.0));
        assert_eq!(lines[4]["type"], "result");
        assert!(lines[4]["data"]["portfolio_decision"].is_object());
        for line in &lines {
            assert!(line["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn test_generate_respects_selected_analysts() {
        let app = create_app(test_state());
        let response = app
            .oneshot(post_json(
                "/api/analysis/generate",
                r#"{"tickers": ["AAPL"], "selected_analysts": ["quality"]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // One analyst plus the two management stages, then the result.
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["stage"], "quality");
        assert!(lines[3]["data"].get("deep_value").is_none());
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_request() {
        let app = create_app(test_state());
        let response = app
            .oneshot(post_json("/api/analysis/generate", r#"{"tickers": []}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Validation failed");
        assert_eq!(json["errors"][0], "At least one ticker must be provided");
    }

    #[tokio::test]
    async fn test_generate_rejects_header_unsafe_request_id() {
        // The id is echoed in the X-Request-Id header; a control character
        // must be a validation error, not a failed response build.
        let state = test_state();
        let app = create_app(state.clone());
        let response = app
            .oneshot(post_json(
                "/api/analysis/generate",
                r#"{"tickers": ["AAPL"], "request_id": "bad\nid"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Validation failed");
        assert_eq!(
            json["errors"][0],
            "Invalid request_id format. Use 1-64 letters, digits, dots, underscores, or hyphens"
        );
        assert_eq!(state.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_generate_conflict_on_duplicate_id() {
        let state = test_state();
        let (_, _token) = state.registry.register(Some("dup".to_string())).unwrap();

        let app = create_app(state);
        let response = app
            .oneshot(post_json(
                "/api/analysis/generate",
                r#"{"tickers": ["AAPL"], "request_id": "dup"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Conflict");
        assert!(json["details"].as_str().unwrap().contains("dup"));
    }

    #[tokio::test]
    async fn test_generate_unregisters_after_drain() {
        let state = test_state();
        let app = create_app(state.clone());
        let response = app
            .oneshot(post_json(
                "/api/analysis/generate",
                r#"{"tickers": ["AAPL"]}"#,
            ))
            .await
            .unwrap();

        // Draining the body to its end drops the stream and its guard.
        let _ = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(state.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_returns_404() {
        let app = create_app(test_state());
        let response = app
            .oneshot(post_json("/api/analysis/cancel/nope", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(
            json["message"],
            "Request nope not found or already completed"
        );
        assert_eq!(json["cancelled"], false);
    }

    #[tokio::test]
    async fn test_cancel_active_flips_token() {
        let state = test_state();
        let (_, token) = state.registry.register(Some("job-1".to_string())).unwrap();

        let app = create_app(state.clone());
        let response = app
            .oneshot(post_json("/api/analysis/cancel/job-1", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Request job-1 cancelled successfully");
        assert_eq!(json["cancelled"], true);
        assert!(token.is_cancelled());
        // The entry stays registered until the run observes the token.
        assert_eq!(state.registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_active_lists_snapshot() {
        let state = test_state();
        let (_, _t1) = state.registry.register(Some("a".to_string())).unwrap();
        let (_, _t2) = state.registry.register(Some("b".to_string())).unwrap();
        state.registry.cancel("b");

        let app = create_app(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/analysis/active")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
        let requests = json["active_requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        for entry in requests {
            assert!(entry["id"].is_string());
            assert!(entry["startedAt"].is_string());
            assert!(entry["cancelled"].is_boolean());
        }
    }

    #[tokio::test]
    async fn test_cancel_all_reports_count() {
        let state = test_state();
        let (_, t1) = state.registry.register(None).unwrap();
        let (_, t2) = state.registry.register(None).unwrap();
        let (_, t3) = state.registry.register(None).unwrap();

        let app = create_app(state);
        let response = app
            .oneshot(post_json("/api/analysis/cancel-all", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Cancelled 3 active requests");
        assert_eq!(json["cancelled_count"], 3);
        assert!(t1.is_cancelled() && t2.is_cancelled() && t3.is_cancelled());
    }

    #[tokio::test]
    async fn test_email_requires_address() {
        let app = create_app(test_state());
        let response = app
            .oneshot(post_json("/api/analysis/email", r#"{"tickers": ["AAPL"]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["details"], "Missing email field");
    }

    #[tokio::test]
    async fn test_email_sends_result() {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(mailer.clone());

        let app = create_app(state.clone());
        let response = app
            .oneshot(post_json(
                "/api/analysis/email",
                r#"{"tickers": ["AAPL", "MSFT"], "email": "trader@example.com"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Analysis generated and emailed successfully");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "trader@example.com");
        assert_eq!(sent[0].subject, "Analysis Result for AAPL, MSFT");
        let data: Value = serde_json::from_str(&sent[0].text_body).unwrap();
        assert!(data["portfolio_decision"].is_object());
        assert!(sent[0].html_body.as_ref().unwrap().starts_with("<pre>"));

        // The run unregistered itself after completing.
        assert_eq!(state.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_email_delivery_failure_returns_502() {
        let state = AppState::new(Arc::new(FailingMailer));
        let app = create_app(state);
        let response = app
            .oneshot(post_json(
                "/api/analysis/email",
                r#"{"tickers": ["AAPL"], "email": "trader@example.com"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Email delivery failed");
    }

    #[tokio::test]
    async fn test_error_terminated_run_yields_no_result() {
        let orchestrator = Orchestrator::new(vec![Arc::new(DoomedStage)]);
        let events = orchestrator.run(json!({}), CancellationToken::new());
        assert!(drain_result("r-doomed", events).await.is_none());
    }

    #[test]
    fn test_cancel_response_serialization() {
        let response = CancelResponse {
            message: "Request r1 cancelled successfully".to_string(),
            cancelled: true,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"cancelled\":true"));

        let response = CancelAllResponse {
            message: "Cancelled 2 active requests".to_string(),
            cancelled_count: 2,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"cancelled_count\":2"));
    }

    #[test]
    fn test_event_line_appends_timestamp() {
        let event = Event::Progress {
            stage: "deep_value".to_string(),
            message: "Completed deep_value analysis".to_string(),
            progress: 0.5,
        };
        let line = event_line(&event);
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["stage"], "deep_value");
        assert_eq!(value["progress"], json!(0.5));
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_render_result_mail() {
        let data = json!({ "portfolio_decision": { "AAPL": { "action": "buy" } } });
        let mail = render_result_mail("trader@example.com", &["AAPL".to_string()], &data);

        assert_eq!(mail.subject, "Analysis Result for AAPL");
        assert!(mail.text_body.contains("\"action\": \"buy\""));
        let html = mail.html_body.unwrap();
        assert!(html.starts_with("<pre>") && html.ends_with("</pre>"));
    }

    #[test]
    fn test_active_guard_unregisters_on_drop() {
        let registry = Arc::new(RequestRegistry::new());
        let (id, _token) = registry.register(None).unwrap();

        let guard = ActiveGuard::new(registry.clone(), id);
        assert_eq!(registry.active_count(), 1);
        drop(guard);
        assert_eq!(registry.active_count(), 0);
    }
}
