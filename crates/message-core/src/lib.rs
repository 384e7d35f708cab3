//! Message and URI value types for the hoplink stack
//!
//! This crate provides the structured message form that the channel and
//! dispatch layers pass around: request/response start lines, an ordered
//! header list with case-insensitive access, URI values with the accessors
//! dispatch relies on (host/port, origin-form, embedded credentials), and
//! the authentication challenge/authorization values used by the retry
//! machinery.
//!
//! Wire parsing and serialization to bytes live in the codec layer, not
//! here; this crate only holds the parsed form.

pub mod auth;
pub mod error;
pub mod header;
pub mod message;
pub mod uri;

pub use error::{Error, Result};
pub use header::Header;
pub use message::{Message, MessageId, Method, StatusCode};
pub use uri::Uri;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::auth::{Challenge, DigestAlgorithm, DigestChallenge};
    pub use crate::header::{self, Header};
    pub use crate::message::{Message, MessageId, Method, StatusCode};
    pub use crate::uri::Uri;
    pub use crate::{Error, Result};
}
