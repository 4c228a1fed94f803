//! Embedding provider adapter.
//!
//! Talks to an Ollama-compatible `POST /api/embeddings` endpoint. Single
//! embeds retry on rate-limit responses only, with exponential backoff and
//! jitter; any other HTTP failure fails immediately. The batched variant is
//! a best-effort single pass used for bulk seeding.

use crate::errors::{AssistError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget for rate-limited requests
pub const DEFAULT_EMBED_RETRIES: u32 = 3;

/// Base backoff before the first retry
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Text-to-vector conversion seam
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text; retries on rate limiting
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed many texts best-effort, no retry logic
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// HTTP embedding client
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    max_retries: u32,
    backoff_ms: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: DEFAULT_EMBED_RETRIES,
            backoff_ms: DEFAULT_BACKOFF_MS,
        })
    }

    pub fn with_retry_policy(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_ms = backoff_ms;
        self
    }

    async fn request_embedding(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedAttempt> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedAttempt::Fatal(AssistError::EmbeddingProvider(e.to_string())))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(EmbedAttempt::RateLimited),
            status if !status.is_success() => Err(EmbedAttempt::Fatal(
                AssistError::EmbeddingProvider(format!("HTTP {}", status)),
            )),
            _ => {
                let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
                    EmbedAttempt::Fatal(AssistError::EmbeddingProvider(format!(
                        "malformed response: {}",
                        e
                    )))
                })?;
                Ok(parsed.embedding)
            }
        }
    }
}

/// Outcome of one embedding attempt
enum EmbedAttempt {
    /// HTTP 429, eligible for retry
    RateLimited,
    /// Everything else fails immediately
    Fatal(AssistError),
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut backoff = self.backoff_ms;

        for attempt in 1..=self.max_retries {
            match self.request_embedding(text).await {
                Ok(vector) => {
                    debug!(dim = vector.len(), attempt, "embedding generated");
                    return Ok(vector);
                }
                Err(EmbedAttempt::Fatal(err)) => return Err(err),
                Err(EmbedAttempt::RateLimited) => {
                    if attempt == self.max_retries {
                        break;
                    }
                    let jitter = rand::thread_rng().gen_range(0..backoff / 2 + 1);
                    let delay = Duration::from_millis(backoff + jitter);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "embedding rate-limited, backing off");
                    tokio::time::sleep(delay).await;
                    backoff *= 2;
                }
            }
        }

        Err(AssistError::RateLimited {
            attempts: self.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for text in texts {
            match self.request_embedding(text).await {
                Ok(vector) => vectors.push(vector),
                Err(EmbedAttempt::RateLimited) => {
                    return Err(AssistError::RateLimited { attempts: 1 });
                }
                Err(EmbedAttempt::Fatal(err)) => return Err(err),
            }
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client =
            HttpEmbeddingClient::new("http://127.0.0.1:11434/", "nomic-embed-text", Duration::from_secs(5));
        assert!(client.is_ok());

        let client = client.unwrap();
        // Trailing slash is normalized away
        assert_eq!(client.base_url, "http://127.0.0.1:11434");
        assert_eq!(client.max_retries, DEFAULT_EMBED_RETRIES);
    }

    #[test]
    fn test_retry_policy_override() {
        let client =
            HttpEmbeddingClient::new("http://127.0.0.1:11434", "nomic-embed-text", Duration::from_secs(5))
                .unwrap()
                .with_retry_policy(5, 100);
        assert_eq!(client.max_retries, 5);
        assert_eq!(client.backoff_ms, 100);
    }

    #[tokio::test]
    #[ignore] // Requires a running Ollama instance
    async fn test_embed_integration() {
        let client =
            HttpEmbeddingClient::new("http://127.0.0.1:11434", "nomic-embed-text", Duration::from_secs(30))
                .unwrap();
        let vector = client.embed("What are your opening hours?").await.unwrap();
        assert!(!vector.is_empty());
    }
}
