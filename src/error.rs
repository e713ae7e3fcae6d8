//! Failure taxonomy of the answering pipeline.
//!
//! Terminal pipeline states such as an empty corpus or a verifier refusal
//! are not errors; they are variants of [`crate::ask::Outcome`]. Only the
//! cases below abort a request.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AskError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("chat session not found: {0}")]
    SessionNotFound(String),

    #[error("generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("retrieval failed: {0:#}")]
    Retrieval(anyhow::Error),

    #[error("storage failed: {0:#}")]
    Storage(anyhow::Error),
}

impl AskError {
    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AskError::GenerationTimeout(_) | AskError::Generation(_) | AskError::Retrieval(_)
        )
    }

    /// Note that the failure itself could not be recorded. Variants without
    /// an underlying cause are returned unchanged; the recorder has already
    /// logged the audit failure at `error!`.
    pub fn with_audit_error(self, audit: &str) -> Self {
        let note = format!("exchange not recorded ({})", audit);
        match self {
            AskError::Generation(e) => AskError::Generation(e.context(note)),
            AskError::Retrieval(e) => AskError::Retrieval(e.context(note)),
            AskError::Storage(e) => AskError::Storage(e.context(note)),
            other => other,
        }
    }
}
