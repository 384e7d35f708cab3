//! Authentication challenge and authorization values
//!
//! Challenges arrive in `WWW-Authenticate`/`Proxy-Authenticate` header
//! values; this module parses them into typed form, computes Digest
//! responses (MD5 and SHA-256, qop `auth` or absent) and renders the
//! matching `Authorization` header values for the Digest, Basic and Bearer
//! schemes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::{Digest as _, Md5};
use sha2::Sha256;
use std::fmt;

use crate::error::{Error, Result};

/// Digest hash algorithms this stack can answer.
///
/// Session variants (`MD5-sess`, `SHA-256-sess`) are not supported; a
/// challenge requesting one is reported as unsupported by
/// [`DigestChallenge::algorithm`] so the caller can skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Maps the challenge's `algorithm` token; an absent token means MD5.
    pub fn from_token(token: Option<&str>) -> Option<Self> {
        match token {
            None => Some(DigestAlgorithm::Md5),
            Some(t) if t.eq_ignore_ascii_case("MD5") => Some(DigestAlgorithm::Md5),
            Some(t) if t.eq_ignore_ascii_case("SHA-256") => Some(DigestAlgorithm::Sha256),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha256 => "SHA-256",
        }
    }

    fn hex_hash(&self, input: &str) -> String {
        match self {
            DigestAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(input.as_bytes());
                hex(&hasher.finalize())
            }
            DigestAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(input.as_bytes());
                hex(&hasher.finalize())
            }
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Outcome of matching a Digest challenge's `qop` offer against what this
/// stack can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QopNegotiation {
    /// No qop directive: legacy RFC 2069 response.
    Missing,
    /// `auth` was offered and will be used.
    Auth,
    /// Only unsupported variants (e.g. `auth-int`) were offered.
    Unsupported,
}

/// A parsed Digest challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// Raw algorithm token as received; `None` means the directive was
    /// absent (which implies MD5).
    pub algorithm: Option<String>,
    /// Raw qop offer list as received.
    pub qop: Option<String>,
}

impl DigestChallenge {
    /// The algorithm to answer with, or `None` when unsupported.
    pub fn algorithm(&self) -> Option<DigestAlgorithm> {
        DigestAlgorithm::from_token(self.algorithm.as_deref())
    }

    /// Picks the first supported qop variant out of the offer.
    pub fn negotiated_qop(&self) -> QopNegotiation {
        match &self.qop {
            None => QopNegotiation::Missing,
            Some(list) => {
                if list
                    .split(',')
                    .any(|q| q.trim().eq_ignore_ascii_case("auth"))
                {
                    QopNegotiation::Auth
                } else {
                    QopNegotiation::Unsupported
                }
            }
        }
    }

    /// A challenge missing realm or nonce cannot be answered.
    pub fn is_answerable(&self) -> bool {
        !self.realm.is_empty() && !self.nonce.is_empty()
    }
}

/// A parsed authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Digest(DigestChallenge),
    Basic { realm: String },
    Bearer { realm: String },
    Other { scheme: String },
}

impl Challenge {
    /// Parses one `WWW-Authenticate`/`Proxy-Authenticate` header value.
    pub fn parse(value: &str) -> Result<Challenge> {
        let value = value.trim();
        let (scheme, params) = match value.split_once(char::is_whitespace) {
            Some((s, p)) => (s, p.trim()),
            None => (value, ""),
        };
        if scheme.is_empty() {
            return Err(Error::InvalidChallenge(value.to_string()));
        }

        let params = parse_params(params);
        let param = |name: &str| -> Option<String> {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        if scheme.eq_ignore_ascii_case("Digest") {
            Ok(Challenge::Digest(DigestChallenge {
                realm: param("realm").unwrap_or_default(),
                nonce: param("nonce").unwrap_or_default(),
                opaque: param("opaque"),
                algorithm: param("algorithm"),
                qop: param("qop"),
            }))
        } else if scheme.eq_ignore_ascii_case("Basic") {
            Ok(Challenge::Basic {
                realm: param("realm").unwrap_or_default(),
            })
        } else if scheme.eq_ignore_ascii_case("Bearer") {
            Ok(Challenge::Bearer {
                realm: param("realm").unwrap_or_default(),
            })
        } else {
            tracing::debug!(scheme, "unrecognized authentication scheme");
            Ok(Challenge::Other {
                scheme: scheme.to_string(),
            })
        }
    }

    pub fn realm(&self) -> &str {
        match self {
            Challenge::Digest(d) => &d.realm,
            Challenge::Basic { realm } => realm,
            Challenge::Bearer { realm } => realm,
            Challenge::Other { .. } => "",
        }
    }
}

/// Splits `k1=v1, k2="v, with comma"` into pairs, honoring quotes.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for part in split_outside_quotes(input, ',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => pairs.push((k.trim().to_string(), unquote(v.trim()))),
            None => pairs.push((part.to_string(), String::new())),
        }
    }
    pairs
}

fn split_outside_quotes(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c == separator && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn unquote(v: &str) -> String {
    v.strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(v)
        .to_string()
}

/// H(username:realm:password), the reusable half of a Digest response.
pub fn compute_ha1(
    algorithm: DigestAlgorithm,
    username: &str,
    realm: &str,
    password: &str,
) -> String {
    algorithm.hex_hash(&format!("{}:{}:{}", username, realm, password))
}

/// The `response` directive for a Digest authorization.
///
/// `qop` carries the negotiated variant together with the nonce count and
/// client nonce; `None` produces the legacy RFC 2069 form.
pub fn compute_digest_response(
    algorithm: DigestAlgorithm,
    ha1: &str,
    nonce: &str,
    qop: Option<(&str, &str, &str)>,
    method: &str,
    uri: &str,
) -> String {
    let ha2 = algorithm.hex_hash(&format!("{}:{}", method, uri));
    match qop {
        Some((qop, nc, cnonce)) => algorithm.hex_hash(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, nonce, nc, cnonce, qop, ha2
        )),
        None => algorithm.hex_hash(&format!("{}:{}:{}", ha1, nonce, ha2)),
    }
}

/// Fresh client nonce.
pub fn generate_cnonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Renders a `Basic` authorization header value.
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64.encode(format!("{}:{}", username, password))
    )
}

/// Renders a `Bearer` authorization header value.
pub fn bearer_authorization(token: &str) -> String {
    format!("Bearer {}", token)
}

/// A computed Digest authorization, rendered with [`fmt::Display`].
#[derive(Debug, Clone)]
pub struct DigestAuthorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub algorithm: DigestAlgorithm,
    pub opaque: Option<String>,
    /// `(qop, nc, cnonce)` when a qop was negotiated.
    pub qop: Option<(String, String, String)>,
}

impl fmt::Display for DigestAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            self.username, self.realm, self.nonce, self.uri, self.response, self.algorithm
        )?;
        if let Some((qop, nc, cnonce)) = &self.qop {
            write!(f, ", qop={}, nc={}, cnonce=\"{}\"", qop, nc, cnonce)?;
        }
        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digest_challenge_with_quoted_qop() {
        let challenge = Challenge::parse(
            "Digest realm=\"testrealm@host.com\", qop=\"auth,auth-int\", \
             nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"",
        )
        .unwrap();
        let Challenge::Digest(d) = challenge else {
            panic!("expected digest");
        };
        assert_eq!(d.realm, "testrealm@host.com");
        assert_eq!(d.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(d.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(d.algorithm(), Some(DigestAlgorithm::Md5));
        assert_eq!(d.negotiated_qop(), QopNegotiation::Auth);
    }

    #[test]
    fn parses_basic_bearer_and_unknown_schemes() {
        assert_eq!(
            Challenge::parse("Basic realm=\"api\"").unwrap(),
            Challenge::Basic {
                realm: "api".to_string()
            }
        );
        assert_eq!(
            Challenge::parse("Bearer realm=\"example\"").unwrap(),
            Challenge::Bearer {
                realm: "example".to_string()
            }
        );
        assert_eq!(
            Challenge::parse("Negotiate").unwrap(),
            Challenge::Other {
                scheme: "Negotiate".to_string()
            }
        );
    }

    #[test]
    fn unsupported_algorithm_and_qop_are_reported() {
        let Challenge::Digest(d) =
            Challenge::parse("Digest realm=\"r\", nonce=\"n\", algorithm=MD5-sess").unwrap()
        else {
            panic!("expected digest");
        };
        assert_eq!(d.algorithm(), None);

        let Challenge::Digest(d) =
            Challenge::parse("Digest realm=\"r\", nonce=\"n\", qop=\"auth-int\"").unwrap()
        else {
            panic!("expected digest");
        };
        assert_eq!(d.negotiated_qop(), QopNegotiation::Unsupported);
    }

    // RFC 2617 section 3.5 example.
    #[test]
    fn md5_digest_known_answer() {
        let ha1 = compute_ha1(
            DigestAlgorithm::Md5,
            "Mufasa",
            "testrealm@host.com",
            "Circle Of Life",
        );
        let response = compute_digest_response(
            DigestAlgorithm::Md5,
            &ha1,
            "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            Some(("auth", "00000001", "0a4f113b")),
            "GET",
            "/dir/index.html",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    // RFC 7616 section 3.9.1 example.
    #[test]
    fn sha256_digest_known_answer() {
        let ha1 = compute_ha1(
            DigestAlgorithm::Sha256,
            "Mufasa",
            "http-auth@example.org",
            "Circle of Life",
        );
        let response = compute_digest_response(
            DigestAlgorithm::Sha256,
            &ha1,
            "7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v",
            Some((
                "auth",
                "00000001",
                "f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ",
            )),
            "GET",
            "/dir/index.html",
        );
        assert_eq!(
            response,
            "753927fa0e85d155564e2e272a28d1802ca10daf4496794697cf8db5856cb6c1"
        );
    }

    #[test]
    fn basic_authorization_encodes_credentials() {
        // RFC 7617 example pair.
        assert_eq!(
            basic_authorization("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn digest_authorization_renders_all_directives() {
        let auth = DigestAuthorization {
            username: "alice".to_string(),
            realm: "r".to_string(),
            nonce: "n".to_string(),
            uri: "/x".to_string(),
            response: "abc".to_string(),
            algorithm: DigestAlgorithm::Md5,
            opaque: Some("op".to_string()),
            qop: Some(("auth".to_string(), "00000001".to_string(), "cn".to_string())),
        };
        let rendered = auth.to_string();
        assert!(rendered.starts_with("Digest username=\"alice\""));
        assert!(rendered.contains("qop=auth, nc=00000001, cnonce=\"cn\""));
        assert!(rendered.contains("opaque=\"op\""));
    }
}
