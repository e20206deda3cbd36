// crates/server/src/mailer.rs
//! Outbound email delivery for finished analysis runs.
//!
//! Two transports: an HTTP transport speaking the SendGrid v3 send API,
//! and a console transport that logs the mail instead of sending it.
//! The console transport is the default when no API key is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A rendered email ready for delivery.
#[derive(Debug, Clone)]
pub struct OutboundMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Email provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Delivery transport for outbound mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundMail) -> Result<(), MailError>;
}

/// Choose the mail transport from the environment.
///
/// `SENDGRID_API_KEY` and `EMAIL_FROM` together select the HTTP
/// transport; anything less falls back to console logging.
pub fn from_env() -> Arc<dyn Mailer> {
    match (std::env::var("SENDGRID_API_KEY"), std::env::var("EMAIL_FROM")) {
        (Ok(key), Ok(from)) if !key.is_empty() && !from.is_empty() => {
            tracing::info!(from = %from, "Using SendGrid mail transport");
            Arc::new(HttpApiMailer::new(key, from))
        }
        _ => {
            tracing::info!("SENDGRID_API_KEY not set; using console mail transport");
            Arc::new(ConsoleMailer::new())
        }
    }
}

// ── Console transport ───────────────────────────────────────────────────

/// Logs outbound mail instead of sending it.
pub struct ConsoleMailer {
    /// Logged body text is cut off past this many characters.
    max_body_chars: usize,
}

impl ConsoleMailer {
    pub fn new() -> Self {
        Self {
            max_body_chars: 5000,
        }
    }
}

impl Default for ConsoleMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<(), MailError> {
        let body: String = mail.text_body.chars().take(self.max_body_chars).collect();
        tracing::info!(
            to = %mail.to,
            subject = %mail.subject,
            body = %body,
            "Outbound email (console transport)"
        );
        Ok(())
    }
}

// ── HTTP transport ──────────────────────────────────────────────────────

const DEFAULT_API_ORIGIN: &str = "https://api.sendgrid.com";

/// Delivers mail through the SendGrid v3 send API.
pub struct HttpApiMailer {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    base_url: String,
}

impl HttpApiMailer {
    pub fn new(api_key: impl Into<String>, from_address: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from_address: from_address.into(),
            base_url: DEFAULT_API_ORIGIN.to_string(),
        }
    }

    /// Point the transport at a different API origin. Used by tests to
    /// target a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Mailer for HttpApiMailer {
    async fn send(&self, mail: &OutboundMail) -> Result<(), MailError> {
        // text/plain must precede text/html in the content array.
        let mut content = vec![serde_json::json!({
            "type": "text/plain",
            "value": mail.text_body,
        })];
        if let Some(html) = &mail.html_body {
            content.push(serde_json::json!({
                "type": "text/html",
                "value": html,
            }));
        }
        let payload = serde_json::json!({
            "personalizations": [{"to": [{"email": mail.to}]}],
            "from": {"email": self.from_address},
            "subject": mail.subject,
            "content": content,
        });

        let resp = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(to = %mail.to, status = %status, "Email accepted by provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mail() -> OutboundMail {
        OutboundMail {
            to: "trader@example.com".to_string(),
            subject: "Analysis Result for AAPL".to_string(),
            text_body: "{\n  \"decision\": \"buy\"\n}".to_string(),
            html_body: Some("<pre>{\n  \"decision\": \"buy\"\n}</pre>".to_string()),
        }
    }

    #[tokio::test]
    async fn test_console_mailer_always_succeeds() {
        let mailer = ConsoleMailer::new();
        mailer.send(&sample_mail()).await.unwrap();
    }

    #[tokio::test]
    async fn test_console_mailer_handles_oversized_body() {
        let mailer = ConsoleMailer::new();
        let mut mail = sample_mail();
        mail.text_body = "x".repeat(20_000);
        mailer.send(&mail).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_mailer_posts_to_send_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/mail/send")
            .match_header("authorization", "Bearer sg-test-key")
            .with_status(202)
            .create_async()
            .await;

        let mailer =
            HttpApiMailer::new("sg-test-key", "reports@example.com").with_base_url(server.url());
        mailer.send(&sample_mail()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_mailer_sends_from_and_subject() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v3/mail/send")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "from": {"email": "reports@example.com"},
                "subject": "Analysis Result for AAPL",
            })))
            .with_status(202)
            .create_async()
            .await;

        let mailer =
            HttpApiMailer::new("sg-test-key", "reports@example.com").with_base_url(server.url());
        mailer.send(&sample_mail()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_mailer_surfaces_provider_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v3/mail/send")
            .with_status(401)
            .with_body("{\"errors\":[{\"message\":\"bad key\"}]}")
            .create_async()
            .await;

        let mailer =
            HttpApiMailer::new("wrong-key", "reports@example.com").with_base_url(server.url());
        let err = mailer.send(&sample_mail()).await.unwrap_err();
        match err {
            MailError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad key"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
