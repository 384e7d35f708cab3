//! Error types for hoplink-provider-core
//!
//! Three families, handled differently by the dispatch machinery:
//! configuration errors fail the request immediately and are never retried;
//! protocol errors are surfaced to the caller explicitly; transport errors
//! are delivered through the io-error listener path and may first pass
//! through one round of internal recovery.

use thiserror::Error;

/// Errors produced by the dispatch layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The request target carries no host
    #[error("request target has no host")]
    MissingHost,

    /// The target's transport is not one this stack carries
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The transport is supported but disabled on this provider
    #[error("transport {0} is disabled")]
    TransportDisabled(String),

    /// The redirect chain exceeded the hop limit
    #[error("too many redirects")]
    TooManyRedirects,

    /// A redirect Location value did not parse as a URI
    #[error("invalid redirect location: {0}")]
    InvalidRedirect(String),

    /// A challenge used a scheme other than Digest, Basic or Bearer
    #[error("unsupported authentication scheme: {0}")]
    UnsupportedAuthScheme(String),

    /// The two-attempt authentication cap was hit
    #[error("authentication attempts exceeded")]
    AuthAttemptsExceeded,

    /// A 401/407 arrived without any challenge header
    #[error("challenge response carries no challenge header")]
    MissingChallenge,

    /// Only a proxy challenge was present; proxy re-challenge is unsupported
    #[error("proxy re-challenge is not supported")]
    ProxyChallengeUnsupported,

    /// The request was cancelled by the caller
    #[error("request cancelled")]
    Cancelled,

    /// Transport-level failure
    #[error("i/o error: {0}")]
    Io(String),

    /// Error bubbled up from the channel layer
    #[error("channel layer: {0}")]
    Channel(hoplink_channel_core::Error),
}

impl From<hoplink_channel_core::Error> for Error {
    fn from(e: hoplink_channel_core::Error) -> Self {
        match e {
            hoplink_channel_core::Error::UnsupportedTransport(name) => {
                Error::UnsupportedTransport(name)
            }
            other => Error::Channel(other),
        }
    }
}

/// Result type for provider-core operations
pub type Result<T> = std::result::Result<T, Error>;
