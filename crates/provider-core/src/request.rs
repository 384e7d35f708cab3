//! Requests and their dispatch-time state
//!
//! A request is built once by the caller and then owned jointly: the caller
//! keeps its `Arc`, while the dispatch layer references it from one channel
//! queue and one per-channel context at a time. The continuation counters
//! (redirects, authentication attempts, resubmission) live on the request
//! itself so a resubmitted request carries its history along.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

use hoplink_channel_core::Channel;
use hoplink_message_core::{Header, Message, MessageId, Method, Uri};

use crate::listener::ResponseListener;
use crate::tasks::TaskId;

struct RequestState {
    method: Method,
    /// Current target: absolute before dispatch, origin-form after the
    /// request line was split for transmission.
    uri: Uri,
    /// Absolute URI remembered when the request line was split; cleared by
    /// a redirect so the next dispatch re-splits.
    original_uri: Option<Uri>,
    headers: Vec<Header>,
    body: Option<Bytes>,
    bank_id: Option<String>,
    redirect_count: u32,
    auth_attempt_count: u32,
    resubmitted: bool,
    cancelled: bool,
    task_name: Option<String>,
    task_id: Option<TaskId>,
    listener: Option<Arc<dyn ResponseListener>>,
    message_id: Option<MessageId>,
    channel: Option<Weak<dyn Channel>>,
}

/// A dispatched (or dispatchable) request.
pub struct Request {
    state: Mutex<RequestState>,
}

pub struct RequestBuilder {
    method: Method,
    uri: Uri,
    headers: Vec<Header>,
    body: Option<Bytes>,
    bank_id: Option<String>,
    task_name: Option<String>,
    listener: Option<Arc<dyn ResponseListener>>,
}

impl RequestBuilder {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Channel-bank partition the request's channel should live in.
    pub fn bank_id(mut self, bank_id: impl Into<String>) -> Self {
        self.bank_id = Some(bank_id.into());
        self
    }

    /// Name under which a background keep-alive task is acquired for the
    /// duration of the exchange.
    pub fn background_task(mut self, name: impl Into<String>) -> Self {
        self.task_name = Some(name.into());
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ResponseListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Arc<Request> {
        Arc::new(Request {
            state: Mutex::new(RequestState {
                method: self.method,
                uri: self.uri,
                original_uri: None,
                headers: self.headers,
                body: self.body,
                bank_id: self.bank_id,
                redirect_count: 0,
                auth_attempt_count: 0,
                resubmitted: false,
                cancelled: false,
                task_name: self.task_name,
                task_id: None,
                listener: self.listener,
                message_id: None,
                channel: None,
            }),
        })
    }
}

impl Request {
    pub fn builder(method: Method, uri: Uri) -> RequestBuilder {
        RequestBuilder {
            method,
            uri,
            headers: Vec::new(),
            body: None,
            bank_id: None,
            task_name: None,
            listener: None,
        }
    }

    /// Shorthand for a bodyless GET.
    pub fn get(uri: Uri) -> Arc<Request> {
        Request::builder(Method::Get, uri).build()
    }

    pub fn method(&self) -> Method {
        self.state.lock().method.clone()
    }

    pub fn uri(&self) -> Uri {
        self.state.lock().uri.clone()
    }

    pub fn original_uri(&self) -> Option<Uri> {
        self.state.lock().original_uri.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.clone())
    }

    pub fn body_len(&self) -> usize {
        self.state.lock().body.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub fn bank_id(&self) -> Option<String> {
        self.state.lock().bank_id.clone()
    }

    pub fn redirect_count(&self) -> u32 {
        self.state.lock().redirect_count
    }

    pub fn auth_attempt_count(&self) -> u32 {
        self.state.lock().auth_attempt_count
    }

    pub fn resubmitted(&self) -> bool {
        self.state.lock().resubmitted
    }

    pub fn cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn listener(&self) -> Option<Arc<dyn ResponseListener>> {
        self.state.lock().listener.clone()
    }

    pub fn task_name(&self) -> Option<String> {
        self.state.lock().task_name.clone()
    }

    pub fn task_id(&self) -> Option<TaskId> {
        self.state.lock().task_id
    }

    /// Correlation id of the message currently queued or in flight.
    pub fn message_id(&self) -> Option<MessageId> {
        self.state.lock().message_id
    }

    pub(crate) fn set_listener(&self, listener: Arc<dyn ResponseListener>) {
        self.state.lock().listener = Some(listener);
    }

    pub(crate) fn set_uri(&self, uri: Uri) {
        self.state.lock().uri = uri;
    }

    pub(crate) fn set_original_uri(&self, uri: Uri) {
        self.state.lock().original_uri = Some(uri);
    }

    pub(crate) fn clear_original_uri(&self) {
        self.state.lock().original_uri = None;
    }

    pub(crate) fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut state = self.state.lock();
        match state.headers.iter_mut().find(|h| h.is(&name)) {
            Some(h) => h.value = value,
            None => state.headers.push(Header::new(name, value)),
        }
    }

    pub(crate) fn remove_header(&self, name: &str) {
        self.state.lock().headers.retain(|h| !h.is(name));
    }

    pub(crate) fn bump_redirect_count(&self) {
        self.state.lock().redirect_count += 1;
    }

    pub(crate) fn bump_auth_attempt(&self) {
        self.state.lock().auth_attempt_count += 1;
    }

    /// Consumes the single resubmission allowance. Returns true when this
    /// call took it, false when it was already spent.
    pub(crate) fn mark_resubmitted(&self) -> bool {
        let mut state = self.state.lock();
        if state.resubmitted {
            false
        } else {
            state.resubmitted = true;
            true
        }
    }

    pub(crate) fn set_cancelled(&self) {
        self.state.lock().cancelled = true;
    }

    pub(crate) fn set_task_id(&self, id: Option<TaskId>) {
        self.state.lock().task_id = id;
    }

    pub(crate) fn take_task_id(&self) -> Option<TaskId> {
        self.state.lock().task_id.take()
    }

    pub(crate) fn set_message_id(&self, id: Option<MessageId>) {
        self.state.lock().message_id = id;
    }

    pub(crate) fn attach_channel(&self, channel: Weak<dyn Channel>) {
        self.state.lock().channel = Some(channel);
    }

    pub(crate) fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.state.lock().channel.as_ref().and_then(Weak::upgrade)
    }

    /// Drops the dispatch-time references after a terminal outcome.
    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        state.message_id = None;
        state.channel = None;
    }

    /// Renders the wire message for the current request state.
    pub(crate) fn build_message(&self) -> Message {
        let state = self.state.lock();
        let mut message = Message::request(state.method.clone(), state.uri.clone());
        for header in &state.headers {
            message.add_header(header.name.clone(), header.value.clone());
        }
        if let Some(body) = &state.body {
            message.set_body(body.clone());
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_populates_state() {
        let request = Request::builder(Method::Post, "http://h/submit".parse().unwrap())
            .header("Accept", "*/*")
            .body(Bytes::from_static(b"payload"))
            .background_task("submit")
            .build();
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.header("accept").as_deref(), Some("*/*"));
        assert_eq!(request.body_len(), 7);
        assert_eq!(request.task_name().as_deref(), Some("submit"));
        assert_eq!(request.redirect_count(), 0);
        assert!(!request.resubmitted());
    }

    #[test]
    fn resubmission_allowance_is_single_use() {
        let request = Request::get("http://h/".parse().unwrap());
        assert!(request.mark_resubmitted());
        assert!(!request.mark_resubmitted());
        assert!(request.resubmitted());
    }

    #[test]
    fn build_message_carries_headers_and_body() {
        let request = Request::builder(Method::Put, "http://h/x".parse().unwrap())
            .header("Content-Type", "text/plain")
            .body(Bytes::from_static(b"abc"))
            .build();
        let message = request.build_message();
        assert!(message.is_request());
        assert_eq!(message.header("content-type"), Some("text/plain"));
        assert_eq!(message.body_len(), 3);
    }
}
