//! Notification provider adapters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use airwatch_common::error::SendError;

/// A downstream channel that delivers one message per call.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a message. Provider throttling must be reported as
    /// `SendError::RateLimited` so the dispatcher can back off.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SendError>;

    /// Human-readable sender name for logs.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendAccepted {
    id: Option<String>,
}

/// Email delivery through the Resend HTTP API.
pub struct ResendSender {
    client: Client,
    base_url: String,
    api_key: String,
    from: String,
}

impl ResendSender {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

#[async_trait]
impl NotificationSender for ResendSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SendError> {
        let email = ResendEmail {
            from: &self.from,
            to: [recipient],
            subject,
            html: body,
        };

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let accepted: Option<ResendAccepted> = response.json().await.ok();
            tracing::debug!(
                email_id = accepted.and_then(|a| a.id).as_deref().unwrap_or("unknown"),
                "Email accepted by Resend"
            );
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &detail))
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}

/// Map a non-2xx provider status to a send error. Only 429 is backpressure.
fn classify_failure(status: StatusCode, detail: &str) -> SendError {
    let message = if detail.trim().is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), detail.trim())
    };

    if status == StatusCode::TOO_MANY_REQUESTS {
        SendError::RateLimited(message)
    } else {
        SendError::Rejected(message)
    }
}

/// Sender used when no email provider is configured; messages are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), SendError> {
        tracing::info!(
            recipient,
            subject,
            body_bytes = body.len(),
            "Email delivery disabled, message logged only"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resend(server: &MockServer, timeout: Duration) -> ResendSender {
        ResendSender::new(
            server.uri(),
            "re_test_key",
            "AQI Monitor <alerts@example.com>",
            timeout,
        )
        .unwrap()
    }

    async fn mount_emails(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test_key"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_429_is_backpressure() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err, SendError::RateLimited("status 429: slow down".to_string()));
        assert!(err.is_backpressure());
    }

    #[test]
    fn test_other_statuses_are_terminal() {
        for status in [
            StatusCode::UNPROCESSABLE_ENTITY,
            StatusCode::FORBIDDEN,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let err = classify_failure(status, "");
            assert!(!err.is_backpressure(), "{status} must not be retried");
            assert!(matches!(err, SendError::Rejected(_)));
        }
    }

    #[test]
    fn test_email_payload_shape() {
        let email = ResendEmail {
            from: "AQI Monitor <alerts@example.com>",
            to: ["user@example.com"],
            subject: "AQI Alert",
            html: "<p>hi</p>",
        };
        let json = serde_json::to_value(&email).unwrap();
        assert_eq!(json["to"], serde_json::json!(["user@example.com"]));
        assert_eq!(json["html"], "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_log_sender_always_succeeds() {
        assert!(LogSender.send("a@example.com", "s", "b").await.is_ok());
    }

    #[tokio::test]
    async fn test_resend_accepts_message() {
        let server = MockServer::start().await;
        mount_emails(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "email-1" })),
        )
        .await;

        let sender = resend(&server, Duration::from_secs(5));
        sender
            .send("user@example.com", "AQI Alert", "<p>hi</p>")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["to"], serde_json::json!(["user@example.com"]));
        assert_eq!(sent["subject"], "AQI Alert");
    }

    #[tokio::test]
    async fn test_resend_429_is_rate_limited() {
        let server = MockServer::start().await;
        mount_emails(
            &server,
            ResponseTemplate::new(429).set_body_string("Too many requests"),
        )
        .await;

        let err = resend(&server, Duration::from_secs(5))
            .send("user@example.com", "AQI Alert", "<p>hi</p>")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SendError::RateLimited("status 429: Too many requests".to_string())
        );
    }

    #[tokio::test]
    async fn test_resend_422_is_rejected() {
        let server = MockServer::start().await;
        mount_emails(&server, ResponseTemplate::new(422)).await;

        let err = resend(&server, Duration::from_secs(5))
            .send("not-an-address", "AQI Alert", "<p>hi</p>")
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Rejected("status 422".to_string()));
    }

    #[tokio::test]
    async fn test_resend_timeout_is_terminal_transport_error() {
        let server = MockServer::start().await;
        mount_emails(
            &server,
            ResponseTemplate::new(200).set_delay(Duration::from_secs(2)),
        )
        .await;

        let err = resend(&server, Duration::from_millis(100))
            .send("user@example.com", "AQI Alert", "<p>hi</p>")
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
        assert!(!err.is_backpressure());
    }
}
