//! Error types for the salon-assist core.
//!
//! Provider and store failures are typed here; the query pipeline itself
//! never surfaces these to a customer — its boundary converts any error
//! into an escalation.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the assistant core
#[derive(Error, Debug)]
pub enum AssistError {
    /// Embedding provider failed after exhausting the retry budget
    #[error("Embedding provider rate-limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// Embedding provider errors (non-retryable)
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Vector store errors
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Ledger state machine violations
    #[error("Invalid status transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Unknown help request or knowledge entry id
    #[error("No record found for id {0}")]
    NotFound(Uuid),

    /// Email provider errors
    #[error("Email provider error: {0}")]
    EmailProvider(String),

    /// Rejected email address (fails the validation regex)
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error("{0}")]
    Generic(String),
}

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, AssistError>;

impl From<anyhow::Error> for AssistError {
    fn from(err: anyhow::Error) -> Self {
        AssistError::Generic(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_display() {
        let err = AssistError::RateLimited { attempts: 3 };
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = AssistError::InvalidTransition {
            from: "Resolved".to_string(),
            to: "Answered".to_string(),
            reason: "terminal state".to_string(),
        };
        assert!(err.to_string().contains("Resolved"));
        assert!(err.to_string().contains("Answered"));
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: AssistError = anyhow::anyhow!("seed file missing").into();
        assert!(matches!(err, AssistError::Generic(_)));
    }
}
