//! Language-model adapter.
//!
//! `complete` is deliberately infallible: transport errors, non-2xx
//! statuses, malformed bodies, and the provider's own `NEED_HELP` sentinel
//! all collapse into [`Completion::NeedsHelp`]. Every classification stage
//! upstream relies on this — a broken model degrades to escalation, never to
//! a crash.

use crate::errors::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Out-of-band token the model is instructed to emit when it cannot answer
/// from the supplied context
pub const NEED_HELP_SENTINEL: &str = "NEED_HELP";

/// Tagged completion result; stages pattern-match instead of comparing
/// sentinel strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Answered(String),
    NeedsHelp,
}

impl Completion {
    /// Classify raw provider text: empty replies and replies carrying the
    /// sentinel token become `NeedsHelp`
    pub fn from_raw(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Completion::NeedsHelp;
        }
        if trimmed.eq_ignore_ascii_case(NEED_HELP_SENTINEL)
            || trimmed.contains(NEED_HELP_SENTINEL)
        {
            return Completion::NeedsHelp;
        }
        Completion::Answered(trimmed.to_string())
    }
}

/// Text-completion seam
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send a prompt; never errors — failures come back as `NeedsHelp`
    async fn complete(&self, prompt: &str) -> Completion;
}

/// HTTP completion client against an Ollama-compatible `POST /api/generate`
#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpLlmClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Check if the completion provider is reachable
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Completion {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "completion request failed");
                return Completion::NeedsHelp;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "completion provider returned error status");
            return Completion::NeedsHelp;
        }

        match response.json::<GenerateResponse>().await {
            Ok(parsed) => {
                debug!(chars = parsed.response.len(), "completion received");
                Completion::from_raw(&parsed.response)
            }
            Err(e) => {
                warn!(error = %e, "malformed completion response");
                Completion::NeedsHelp
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_answered() {
        let completion = Completion::from_raw("  We open at 9am.  ");
        assert_eq!(completion, Completion::Answered("We open at 9am.".to_string()));
    }

    #[test]
    fn test_from_raw_sentinel_exact() {
        assert_eq!(Completion::from_raw("NEED_HELP"), Completion::NeedsHelp);
        assert_eq!(Completion::from_raw("need_help"), Completion::NeedsHelp);
    }

    #[test]
    fn test_from_raw_sentinel_embedded() {
        // Models sometimes wrap the sentinel in prose
        assert_eq!(
            Completion::from_raw("I'm sorry, NEED_HELP."),
            Completion::NeedsHelp
        );
    }

    #[test]
    fn test_from_raw_empty() {
        assert_eq!(Completion::from_raw("   "), Completion::NeedsHelp);
    }

    #[test]
    fn test_client_creation() {
        let client = HttpLlmClient::new(
            "http://127.0.0.1:11434/",
            "qwen2.5:7b-instruct",
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:11434");
        assert_eq!(client.model(), "qwen2.5:7b-instruct");
    }

    #[tokio::test]
    async fn test_unreachable_provider_degrades_to_needs_help() {
        // Nothing listens on this port; the adapter must not error
        let client = HttpLlmClient::new(
            "http://127.0.0.1:59999",
            "qwen2.5:7b-instruct",
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(client.complete("hello").await, Completion::NeedsHelp);
    }
}
