//! Outbound alert notifiers
//!
//! A notifier is called once per claimed alert, possibly several times when
//! a delivery attempt fails with a retryable error. Every request carries the
//! alert's idempotency key so a receiving service can drop duplicates.

use crate::pipeline::types::AlertNotice;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Webhook rejected message: {0}")]
    Rejected(String),
}

impl NotifyError {
    /// Transport failures, throttling and server errors are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(_) => true,
            NotifyError::Status { status, .. } => *status == 429 || *status >= 500,
            NotifyError::Rejected(_) => false,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertNotice) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// Posts alerts to a chat webhook as form data
///
/// Request: `POST {url}` with `text=Please {action} {ticker}` and, when
/// configured, `channel={channel}`; `Authorization: Bearer {token}`;
/// `Idempotency-Key: {ticker}:{window_end_ms}`.
///
/// A 2xx response whose JSON body has `"ok": false` is a rejection.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    channel: Option<String>,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        channel: Option<String>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            token,
            channel,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &AlertNotice) -> Result<(), NotifyError> {
        let mut form = vec![("text", alert.message())];
        if let Some(channel) = &self.channel {
            form.push(("channel", channel.clone()));
        }

        let mut request = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", alert.idempotency_key())
            .form(&form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            if json.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                let reason = json
                    .get("error")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                return Err(NotifyError::Rejected(reason));
            }
        }

        log::debug!("📨 Webhook accepted {}", alert.idempotency_key());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Writes alerts to the log instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &AlertNotice) -> Result<(), NotifyError> {
        log::info!(
            "🔔 {} (vwap {:.4} at {})",
            alert.message(),
            alert.vwap,
            alert.t.to_rfc3339()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
