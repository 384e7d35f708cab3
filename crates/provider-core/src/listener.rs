//! Caller-facing callback surface
//!
//! One listener per request, attached at dispatch time. Every callback is
//! invoked synchronously from an event-loop callback; implementations may
//! re-enter the provider (e.g. cancel from within `on_response_headers`)
//! but must not block.

use std::sync::Arc;

use hoplink_channel_core::Hop;
use hoplink_message_core::auth::DigestAlgorithm;
use hoplink_message_core::Message;

use crate::error::Error;
use crate::request::Request;

/// Authentication scheme a credential request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Digest,
    Basic,
    Bearer,
    /// Transport-level client certificate; surfaced for completeness, never
    /// requested by the dispatch layer itself.
    TlsClientCertificate,
}

/// A credential request, filled in by the listener.
///
/// Leaving every credential slot empty means "no credentials available";
/// the challenge response is then delivered to the caller unchanged.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub realm: String,
    pub mode: AuthMode,
    /// Digest hash algorithm of the challenge, when applicable.
    pub algorithm: Option<DigestAlgorithm>,
    /// The destination the credentials are for.
    pub target: Hop,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Precomputed H(username:realm:password); wins over `password`.
    pub ha1: Option<String>,
    pub bearer_token: Option<String>,
}

impl AuthEvent {
    pub fn new(realm: impl Into<String>, mode: AuthMode, target: Hop) -> Self {
        AuthEvent {
            realm: realm.into(),
            mode,
            algorithm: None,
            target,
            username: None,
            password: None,
            ha1: None,
            bearer_token: None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.ha1.is_some() || self.bearer_token.is_some()
    }
}

/// Receives the terminal outcome of a request, plus the optional
/// intermediate hooks.
///
/// Exactly one of `on_response` / `on_io_error` fires per request, after
/// any internal continuation (authentication retry, redirect following,
/// disconnection resubmission) has run its course. A cancelled request
/// fires neither.
pub trait ResponseListener: Send + Sync {
    /// Response headers are complete; the body may still be arriving.
    fn on_response_headers(&self, _request: &Arc<Request>, _response: &Message) {}

    /// Terminal success: a complete response, possibly after internal
    /// retries.
    fn on_response(&self, request: &Arc<Request>, response: Message);

    /// Terminal failure: configuration, protocol or transport error.
    fn on_io_error(&self, request: &Arc<Request>, error: Error);

    /// A challenge needs credentials the request URI does not carry.
    /// Consulted at most once per challenge response.
    fn on_auth_requested(&self, _event: &mut AuthEvent) {}
}
