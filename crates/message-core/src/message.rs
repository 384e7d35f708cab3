//! Structured request/response messages
//!
//! The channel layer queues and delivers these; the dispatch layer builds
//! requests from caller state and interprets responses. Every message gets
//! a correlation id at construction time so the layers above can track a
//! message through queue inspection and sent/received notifications without
//! holding a reference to it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::header::Header;
use crate::uri::Uri;

/// Correlation id assigned at construction and preserved by `Clone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    fn generate() -> Self {
        MessageId(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Other(s) => s,
        }
    }

    /// GET and HEAD are the only methods the dispatch layer will re-issue
    /// on its own initiative.
    pub fn is_auto_redirectable(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const TEMPORARY_REDIRECT: StatusCode = StatusCode(307);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// The redirect statuses the dispatch layer follows automatically.
    pub fn is_followable_redirect(&self) -> bool {
        matches!(
            *self,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::TEMPORARY_REDIRECT
        )
    }

    /// 401 or 407.
    pub fn is_auth_challenge(&self) -> bool {
        matches!(
            *self,
            StatusCode::UNAUTHORIZED | StatusCode::PROXY_AUTHENTICATION_REQUIRED
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Start line of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartLine {
    Request { method: Method, target: Uri },
    Response { status: StatusCode, reason: String },
}

/// A structured request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    start: StartLine,
    headers: Vec<Header>,
    body: Option<Bytes>,
}

impl Message {
    /// Creates a request message.
    pub fn request(method: Method, target: Uri) -> Self {
        Message {
            id: MessageId::generate(),
            start: StartLine::Request { method, target },
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a response message.
    pub fn response(status: StatusCode, reason: impl Into<String>) -> Self {
        Message {
            id: MessageId::generate(),
            start: StartLine::Response {
                status,
                reason: reason.into(),
            },
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start, StartLine::Response { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match &self.start {
            StartLine::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn method(&self) -> Option<&Method> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Uri> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn set_target(&mut self, target: Uri) {
        if let StartLine::Request { target: t, .. } = &mut self.start {
            *t = target;
        }
    }

    /// First value for `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// All values for `name`, in order. Challenge headers may repeat.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.is(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Replaces the first occurrence of `name`, or appends.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|h| h.is(&name)) {
            Some(h) => h.value = value,
            None => self.headers.push(Header::new(name, value)),
        }
    }

    /// Appends without replacing; used for repeatable headers.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header::new(name, value));
    }

    /// Removes every occurrence of `name`. Returns how many were dropped.
    pub fn remove_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|h| !h.is(name));
        before - self.headers.len()
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Bytes) {
        self.body = Some(body);
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map(|b| b.len()).unwrap_or(0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.start {
            StartLine::Request { method, target } => write!(f, "{} {}", method, target),
            StartLine::Response { status, reason } => write!(f, "{} {}", status, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_access_is_case_insensitive() {
        let mut msg = Message::request(Method::Get, "http://example.com/".parse().unwrap());
        msg.set_header("Content-Length", "12");
        assert_eq!(msg.header("content-length"), Some("12"));
        msg.set_header("CONTENT-LENGTH", "15");
        assert_eq!(msg.header("Content-Length"), Some("15"));
        assert_eq!(msg.headers().len(), 1);
        assert_eq!(msg.remove_header("content-Length"), 1);
        assert_eq!(msg.header("Content-Length"), None);
    }

    #[test]
    fn repeated_headers_keep_order() {
        let mut msg = Message::response(StatusCode::UNAUTHORIZED, "Unauthorized");
        msg.add_header("WWW-Authenticate", "Digest realm=\"a\"");
        msg.add_header("WWW-Authenticate", "Basic realm=\"b\"");
        let values = msg.header_values("www-authenticate");
        assert_eq!(values, vec!["Digest realm=\"a\"", "Basic realm=\"b\""]);
    }

    #[test]
    fn clone_preserves_correlation_id() {
        let msg = Message::request(Method::Head, "http://example.com/".parse().unwrap());
        assert_eq!(msg.id(), msg.clone().id());
    }

    #[test]
    fn status_classification() {
        assert!(StatusCode(302).is_followable_redirect());
        assert!(!StatusCode(303).is_followable_redirect());
        assert!(StatusCode(401).is_auth_challenge());
        assert!(StatusCode(407).is_auth_challenge());
        assert!(!StatusCode(403).is_auth_challenge());
    }
}
