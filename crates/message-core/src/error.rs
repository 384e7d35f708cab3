//! Error types for hoplink-message-core

use thiserror::Error;

/// Errors produced while building or interpreting message values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The string is not a parsable URI
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// The header value is not a parsable authentication challenge
    #[error("invalid challenge: {0}")]
    InvalidChallenge(String),
}

/// Result type for message-core operations
pub type Result<T> = std::result::Result<T, Error>;
