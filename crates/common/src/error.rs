use thiserror::Error;

/// Top-level error type shared across the worker crates.
#[derive(Debug, Error)]
pub enum SfnPoolError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote service error: {0}")]
    Service(String),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, SfnPoolError>;
