//! Router Error Types
//!
//! Errors surfaced by router construction and routing operations. Ordinary
//! backend failures are not errors here: they travel inside a
//! [`GenerationResponse`](crate::api::GenerationResponse) as a
//! [`BackendFailure`](crate::api::BackendFailure).

use thiserror::Error;

/// Main error type for router operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (invalid JSON, missing clients, bad thresholds)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown policy name or invalid policy settings
    #[error("Policy error: {0}")]
    Policy(String),

    /// The request violates the client contract and was never dispatched
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An operation named a backend id that is not registered
    #[error("Backend '{0}' is not registered with this router")]
    UnknownBackend(String),

    /// Pre-emptive rejection by a circuit breaker; no call was made
    #[error("Circuit open for backend '{0}'")]
    CircuitOpen(String),

    /// Every backend is currently ineligible
    #[error("No backend available: every configured backend is disabled or has an open circuit")]
    NoBackendAvailable,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Whether this error is fatal at startup rather than per-request
    pub fn is_startup_error(&self) -> bool {
        matches!(self, RouterError::Config(_) | RouterError::Policy(_))
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Config(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
