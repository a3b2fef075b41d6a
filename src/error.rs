//! Error types for the Anchorite filtering engine
//!
//! Structured error definitions use thiserror; binaries propagate with anyhow.
//! Errors raised on the decision path are turned into degraded decisions by the
//! orchestrator and never reach the interception host.

use thiserror::Error;

/// Main error type for Anchorite operations
#[derive(Error, Debug)]
pub enum AnchoriteError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Referenced decision is unknown (evicted or never issued)
    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    /// Feedback was already recorded for this decision
    #[error("Feedback already recorded for decision {0}")]
    AlreadyFedBack(String),

    /// A model was asked to score a vector with a different layout
    #[error("Feature layout mismatch: model expects {expected}, vector has {actual}")]
    LayoutMismatch { expected: String, actual: String },

    /// A bounded operation exceeded its budget
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Anchorite operations
pub type Result<T> = std::result::Result<T, AnchoriteError>;

/// Convert anyhow::Error to AnchoriteError
impl From<anyhow::Error> for AnchoriteError {
    fn from(err: anyhow::Error) -> Self {
        AnchoriteError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for AnchoriteError {
    fn from(err: rusqlite::Error) -> Self {
        AnchoriteError::Database(err.to_string())
    }
}

impl From<toml::de::Error> for AnchoriteError {
    fn from(err: toml::de::Error) -> Self {
        AnchoriteError::Config(config::ConfigError::Message(err.to_string()))
    }
}
