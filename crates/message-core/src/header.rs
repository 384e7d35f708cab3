//! Header representation and the header names this stack touches

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host/port of the request target, set when the request line is rewritten
/// to origin-form.
pub const HOST: &str = "Host";
/// Body length in bytes.
pub const CONTENT_LENGTH: &str = "Content-Length";
/// Client credentials for the origin server.
pub const AUTHORIZATION: &str = "Authorization";
/// Client credentials for a proxy.
pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
/// Origin-server authentication challenge (401).
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";
/// Proxy authentication challenge (407).
pub const PROXY_AUTHENTICATE: &str = "Proxy-Authenticate";
/// Redirect target (301/302/307).
pub const LOCATION: &str = "Location";

/// A single name/value header.
///
/// Names compare case-insensitively everywhere in this stack; the original
/// casing is preserved for the codec layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}
