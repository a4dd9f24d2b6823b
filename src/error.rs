//! Error types for Bulwark.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Bulwark operations.
#[derive(Error, Debug)]
pub enum BulwarkError {
    /// The durable store rejected a read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The transport failed to deliver a message
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Malformed window duration or limiter configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The primary counter store could not be reached
    #[error("Limiter unavailable: {0}")]
    LimiterUnavailable(String),

    /// A message was rejected before reaching the store
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No queue item with the given id
    #[error("Queue item not found: {0}")]
    NotFound(Uuid),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Bulwark operations.
pub type Result<T> = std::result::Result<T, BulwarkError>;
