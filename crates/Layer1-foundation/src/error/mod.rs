//! Error types for agentd
//!
//! Every fallible operation outside the worker pool's result paths returns
//! this error. The worker pool encodes outcomes in `TaskResult` instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// agentd error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Security
    // ========================================================================
    /// Command or path rejected by the security policy, before any execution
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // ========================================================================
    // Sandbox / container engine
    // ========================================================================
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Task error: {0}")]
    Task(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Security faults are never retryable: the same input is denied again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Sandbox(_))
    }

    /// Whether the error can be shown to the caller as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::SecurityViolation(_)
                | Error::ResourceExceeded(_)
                | Error::NotFound(_)
                | Error::InvalidInput(_)
                | Error::Timeout(_)
        )
    }

    /// Whether this is a pre-execution security denial
    pub fn is_security_fault(&self) -> bool {
        matches!(self, Error::SecurityViolation(_))
    }

    pub fn sandbox(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Sandbox(format!("{}: {}", context, err))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
