//! Outbound email for resolved help requests.
//!
//! Delivery is best effort. A send failure never blocks the resolution
//! path; callers log it and move on.

use crate::errors::{AssistError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

/// Lenient shape check: something@something.something
pub fn is_valid_email(address: &str) -> bool {
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap()
    });
    re.is_match(address.trim())
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Client for an HTTP transactional-email API
pub struct HttpEmailClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_address: String,
}

impl HttpEmailClient {
    pub fn new(endpoint: &str, api_key: &str, from_address: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            from_address: from_address.to_string(),
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailClient {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        if !is_valid_email(to) {
            return Err(AssistError::InvalidEmail(to.to_string()));
        }

        let payload = SendRequest {
            from: &self.from_address,
            to,
            subject,
            text: body,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AssistError::EmailProvider(format!(
                "send failed with status {}",
                response.status()
            )));
        }

        info!(to, "follow-up email sent");
        Ok(())
    }
}

/// Sink for deployments without an email provider configured
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<()> {
        info!(to, "email delivery disabled, skipping");
        Ok(())
    }
}
