//! Provider gateway traits.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Completion, PromptEnvelope, ProviderKind};

/// Error surface of a single provider attempt.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl LlmError {
    /// Whether the fallback chain should advance past this failure.
    /// A malformed request would fail identically everywhere, so only
    /// availability-class errors trigger the next candidate.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LlmError::Unavailable(_) | LlmError::Timeout(_) | LlmError::RateLimited(_)
        )
    }
}

/// A single LLM backend with a fixed method set; implementations map the
/// envelope to the provider's wire format and back.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stable provider name used for selection and reporting.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Run one generation.
    async fn generate(&self, envelope: &PromptEnvelope) -> Result<Completion, LlmError>;

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<(), LlmError>;
}
