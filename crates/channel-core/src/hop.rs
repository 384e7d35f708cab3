//! Hops: resolved destination descriptors
//!
//! A hop is transient: it is derived from a request's target URI at
//! dispatch time, used for channel selection, and discarded.

use std::fmt;

use hoplink_message_core::Uri;

use crate::error::{Error, Result};

/// Bank identifier used when none is specified.
pub const DEFAULT_BANK_ID: &str = "default";

/// The transports this stack carries requests over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Reliable stream transport (TCP).
    Stream,
    /// TLS-secured stream transport.
    SecureStream,
}

impl TransportKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::Stream => "TCP",
            TransportKind::SecureStream => "TLS",
        }
    }

    /// Maps a transport name; anything but the two stream kinds is refused.
    pub fn from_name(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("tcp") {
            Ok(TransportKind::Stream)
        } else if name.eq_ignore_ascii_case("tls") {
            Ok(TransportKind::SecureStream)
        } else {
            Err(Error::UnsupportedTransport(name.to_string()))
        }
    }

    /// Maps a URI scheme; only `http` and `https` are carried.
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        if scheme.eq_ignore_ascii_case("http") {
            Ok(TransportKind::Stream)
        } else if scheme.eq_ignore_ascii_case("https") {
            Ok(TransportKind::SecureStream)
        } else {
            Err(Error::UnsupportedTransport(scheme.to_string()))
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A desired destination: transport, canonical host, port and the bank
/// the channel should live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub bank_id: String,
}

impl Hop {
    pub fn new(transport: TransportKind, host: impl Into<String>, port: u16) -> Self {
        Hop {
            transport,
            host: host.into(),
            port,
            bank_id: DEFAULT_BANK_ID.to_string(),
        }
    }

    /// Derives a hop from an absolute request URI.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let transport = TransportKind::from_scheme(uri.scheme())?;
        Ok(Hop::new(transport, uri.host(), uri.port_or_default()))
    }

    /// Assigns a bank identifier; an empty label normalizes to the default.
    pub fn with_bank_id(mut self, bank_id: impl Into<String>) -> Self {
        let bank_id = bank_id.into();
        self.bank_id = if bank_id.is_empty() {
            DEFAULT_BANK_ID.to_string()
        } else {
            bank_id
        };
        self
    }
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.transport, self.host, self.port)?;
        if self.bank_id != DEFAULT_BANK_ID {
            write!(f, " [{}]", self.bank_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_from_uri_uses_scheme_and_default_port() {
        let uri: Uri = "https://example.com/a".parse().unwrap();
        let hop = Hop::from_uri(&uri).unwrap();
        assert_eq!(hop.transport, TransportKind::SecureStream);
        assert_eq!(hop.host, "example.com");
        assert_eq!(hop.port, 443);
        assert_eq!(hop.bank_id, DEFAULT_BANK_ID);
    }

    #[test]
    fn unsupported_scheme_is_refused() {
        let uri: Uri = "ftp://example.com/a".parse().unwrap();
        assert_eq!(
            Hop::from_uri(&uri),
            Err(Error::UnsupportedTransport("ftp".to_string()))
        );
    }

    #[test]
    fn empty_bank_id_normalizes_to_default() {
        let hop = Hop::new(TransportKind::Stream, "h", 80).with_bank_id("");
        assert_eq!(hop.bank_id, DEFAULT_BANK_ID);
        let hop = Hop::new(TransportKind::Stream, "h", 80).with_bank_id("pool-a");
        assert_eq!(hop.bank_id, "pool-a");
    }
}
