//! Outgoing mail.
//!
//! Jobs hand a finished [`Email`] to a [`Mailer`]. Production deployments
//! point `MAIL_RELAY_URL` at an HTTP relay; without it mail is written to
//! the log so development setups need no mail server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async, RetryPolicy};

/// A plain-text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

impl Email {
    pub fn new(to: Vec<String>, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            text: text.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> WorkerResult<()>;
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> WorkerResult<()> {
        info!(
            from = %self.from,
            to = ?email.to,
            subject = %email.subject,
            "Mail (not delivered, no relay configured)"
        );
        debug!("{}", email.text);
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

/// Posts messages as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    url: String,
    from: String,
    policy: RetryPolicy,
}

impl HttpMailer {
    pub fn new(url: impl Into<String>, from: impl Into<String>) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| WorkerError::config_error(format!("mail client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            from: from.into(),
            policy: RetryPolicy::new("mail_relay"),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn post(&self, email: &Email) -> WorkerResult<()> {
        let body = RelayMessage {
            from: &self.from,
            to: &email.to,
            subject: &email.subject,
            text: &email.text,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::mail_failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(WorkerError::mail_failed(format!("relay returned {status}: {detail}")))
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> WorkerResult<()> {
        if email.to.is_empty() {
            return Ok(());
        }
        retry_async(&self.policy, || self.post(email))
            .await
            .map_err(|(e, attempts)| {
                WorkerError::mail_failed(format!("{e} (after {attempts} attempts)"))
            })?;
        debug!(to = ?email.to, subject = %email.subject, "Mail delivered to relay");
        Ok(())
    }
}

/// Pick the mailer the configuration asks for.
pub fn from_config(config: &WorkerConfig) -> WorkerResult<Arc<dyn Mailer>> {
    match &config.mail_relay_url {
        Some(url) => {
            info!("Delivering mail through relay {}", url);
            Ok(Arc::new(HttpMailer::new(url, &config.mail_from)?))
        }
        None => Ok(Arc::new(LogMailer::new(&config.mail_from))),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn greeting() -> Email {
        Email::new(
            vec!["asha@example.com".to_string()],
            "Welcome",
            "Hello Asha",
        )
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new("test")
            .with_max_retries(1)
            .with_base_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn posts_message_to_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_json(serde_json::json!({
                "from": "noreply@example.com",
                "to": ["asha@example.com"],
                "subject": "Welcome",
                "text": "Hello Asha"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(format!("{}/send", server.uri()), "noreply@example.com")
            .unwrap()
            .with_policy(quick_policy());
        mailer.send(&greeting()).await.unwrap();
    }

    #[tokio::test]
    async fn relay_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(server.uri(), "noreply@example.com")
            .unwrap()
            .with_policy(quick_policy());
        let err = mailer.send(&greeting()).await.unwrap_err();
        assert!(matches!(err, WorkerError::MailFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        tokio_test::assert_ok!(LogMailer::new("noreply@example.com").send(&greeting()).await);
    }

    #[test]
    fn relay_url_selects_http_mailer() {
        let config = WorkerConfig {
            mail_relay_url: Some("http://localhost:9/send".to_string()),
            ..WorkerConfig::default()
        };
        assert!(from_config(&config).is_ok());
        assert!(from_config(&WorkerConfig::default()).is_ok());
    }
}
