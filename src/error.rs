//! Error types for station operations

use thiserror::Error;

/// Result type alias for station operations
pub type Result<T> = std::result::Result<T, StationError>;

/// Error types that can occur while moving objects through the station
#[derive(Error, Debug)]
pub enum StationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object failed to classify: {0}")]
    Classify(String),

    #[error("Queue element error: {0}")]
    Queue(String),

    #[error("Quarantine error: {0}")]
    Quarantine(String),

    #[error("Anonymizer error: {0}")]
    Anonymizer(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StationError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new classification error
    pub fn classify(msg: impl Into<String>) -> Self {
        Self::Classify(msg.into())
    }

    /// Create a new queue element error
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
