//! Error types for hoplink-channel-core

use thiserror::Error;

/// Errors produced by the channel layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport name does not map to a supported kind
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The channel factory could not produce a channel
    #[error("channel creation failed: {0}")]
    ChannelCreation(String),

    /// Operation attempted on a channel that is already closed
    #[error("channel is closed")]
    ChannelClosed,

    /// A keep-alive probe write failed
    #[error("probe write failed: {0}")]
    ProbeFailed(String),
}

/// Result type for channel-core operations
pub type Result<T> = std::result::Result<T, Error>;
