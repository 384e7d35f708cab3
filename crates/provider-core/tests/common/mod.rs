//! Shared test support: recording listener, scripted factory wiring
#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hoplink_channel_core::{ManualScheduler, MockFactory};
use hoplink_message_core::{Message, StatusCode};
use hoplink_provider_core::{
    AuthEvent, BackgroundTaskManager, Error, Provider, ProviderConfig, Request, ResponseListener,
    TaskId,
};

/// Listener that records every callback and can hand out scripted
/// credentials.
#[derive(Default)]
pub struct RecordingListener {
    pub responses: Mutex<Vec<Message>>,
    pub errors: Mutex<Vec<Error>>,
    pub headers_seen: Mutex<usize>,
    pub auth_requests: Mutex<usize>,
    pub username_password: Mutex<Option<(String, String)>>,
    pub bearer_token: Mutex<Option<String>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingListener::default())
    }

    pub fn with_password(username: &str, password: &str) -> Arc<Self> {
        let listener = RecordingListener::default();
        *listener.username_password.lock() = Some((username.to_string(), password.to_string()));
        Arc::new(listener)
    }

    pub fn with_bearer(token: &str) -> Arc<Self> {
        let listener = RecordingListener::default();
        *listener.bearer_token.lock() = Some(token.to_string());
        Arc::new(listener)
    }

    pub fn response_statuses(&self) -> Vec<StatusCode> {
        self.responses
            .lock()
            .iter()
            .filter_map(|r| r.status())
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_silent(&self) -> bool {
        self.responses.lock().is_empty()
            && self.errors.lock().is_empty()
            && *self.headers_seen.lock() == 0
    }
}

impl ResponseListener for RecordingListener {
    fn on_response_headers(&self, _request: &Arc<Request>, _response: &Message) {
        *self.headers_seen.lock() += 1;
    }

    fn on_response(&self, _request: &Arc<Request>, response: Message) {
        self.responses.lock().push(response);
    }

    fn on_io_error(&self, _request: &Arc<Request>, error: Error) {
        self.errors.lock().push(error);
    }

    fn on_auth_requested(&self, event: &mut AuthEvent) {
        *self.auth_requests.lock() += 1;
        if let Some((username, password)) = self.username_password.lock().clone() {
            event.username = Some(username);
            event.password = Some(password);
        }
        if let Some(token) = self.bearer_token.lock().clone() {
            event.bearer_token = Some(token);
        }
    }
}

/// Background-task manager that records begin/end pairs.
#[derive(Default)]
pub struct RecordingTasks {
    next: AtomicU64,
    pub begun: Mutex<Vec<(TaskId, String)>>,
    pub ended: Mutex<Vec<TaskId>>,
}

impl BackgroundTaskManager for RecordingTasks {
    fn begin(&self, name: &str) -> TaskId {
        let id = TaskId(self.next.fetch_add(1, Ordering::Relaxed));
        self.begun.lock().push((id, name.to_string()));
        id
    }

    fn end(&self, id: TaskId) {
        self.ended.lock().push(id);
    }
}

pub struct Harness {
    pub provider: Provider,
    pub factory: Arc<MockFactory>,
    pub scheduler: Arc<ManualScheduler>,
}

pub fn harness() -> Harness {
    harness_with_config(ProviderConfig::default())
}

pub fn harness_with_config(config: ProviderConfig) -> Harness {
    let factory = Arc::new(MockFactory::new());
    let scheduler = Arc::new(ManualScheduler::new());
    let provider = Provider::with_config(factory.clone(), scheduler.clone(), config);
    Harness {
        provider,
        factory,
        scheduler,
    }
}

/// Builds a response with the given status and headers.
pub fn response(status: u16, headers: &[(&str, &str)]) -> Message {
    let mut message = Message::response(StatusCode(status), reason_for(status));
    for (name, value) in headers {
        message.add_header(*name, *value);
    }
    message
}

fn reason_for(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        401 => "Unauthorized",
        407 => "Proxy Authentication Required",
        _ => "Response",
    }
}
