//! Error types for opsmith.

use thiserror::Error;

/// Result type alias using opsmith's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for opsmith.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // =========================================================================
    // Safety Errors
    // =========================================================================
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    // =========================================================================
    // Language Model Errors
    // =========================================================================
    #[error("All language model providers unavailable: {0}")]
    LlmUnavailable(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a policy-denied error.
    pub fn policy_denied(msg: impl Into<String>) -> Self {
        Self::PolicyDenied(msg.into())
    }

    /// Create an LLM-unavailable error.
    pub fn llm_unavailable(msg: impl Into<String>) -> Self {
        Self::LlmUnavailable(msg.into())
    }

    /// Create an execution-failed error.
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
