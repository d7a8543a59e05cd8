//! Error types for stream-service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unknown stream variant: {0}")]
    InvalidVariant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
