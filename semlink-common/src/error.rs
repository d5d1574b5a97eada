//! Common error types for semlink

use thiserror::Error;

/// Common result type for semlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across semlink crates
#[derive(Error, Debug)]
pub enum Error {
    /// Cache store operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
