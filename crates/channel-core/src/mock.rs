//! Scriptable channel double for tests
//!
//! `MockChannel` implements the [`Channel`] seam with no sockets behind it:
//! tests queue messages through the normal API, then inject the transport
//! events (state transitions, sent/received notifications) a real transport
//! would report. Available to downstream crates through the `testing`
//! feature.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::warn;

use hoplink_message_core::{Message, MessageId};

use crate::channel::{Channel, ChannelFactory, ChannelId, ChannelObserver, ProbeKind};
use crate::error::{Error, Result};
use crate::hop::{Hop, TransportKind, DEFAULT_BANK_ID};
use crate::state::ChannelState;

pub struct MockChannelBuilder {
    transport: TransportKind,
    peer_host: String,
    peer_port: u16,
    has_name: bool,
    bank_id: String,
    local_host: String,
    local_port: u16,
}

impl MockChannelBuilder {
    pub fn anonymous(mut self) -> Self {
        self.has_name = false;
        self
    }

    pub fn bank_id(mut self, bank_id: impl Into<String>) -> Self {
        self.bank_id = bank_id.into();
        self
    }

    pub fn local(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_host = host.into();
        self.local_port = port;
        self
    }

    pub fn build(self) -> Arc<MockChannel> {
        Arc::new_cyclic(|weak| MockChannel {
            id: ChannelId::next(),
            transport: self.transport,
            self_weak: weak.clone(),
            observer: Mutex::new(None),
            state: Mutex::new(MockState {
                state: ChannelState::Init,
                peer_host: self.peer_host,
                peer_port: self.peer_port,
                has_name: self.has_name,
                bank_id: self.bank_id,
                local_host: self.local_host,
                local_port: self.local_port,
                about_to_be_closed: false,
                force_closed: false,
                last_activity: Instant::now(),
                queue: Vec::new(),
                opened_hops: Vec::new(),
                probes: Vec::new(),
                fail_next_probe: false,
            }),
        })
    }
}

struct MockState {
    state: ChannelState,
    peer_host: String,
    peer_port: u16,
    has_name: bool,
    bank_id: String,
    local_host: String,
    local_port: u16,
    about_to_be_closed: bool,
    force_closed: bool,
    last_activity: Instant,
    queue: Vec<Message>,
    opened_hops: Vec<Hop>,
    probes: Vec<ProbeKind>,
    fail_next_probe: bool,
}

pub struct MockChannel {
    id: ChannelId,
    transport: TransportKind,
    self_weak: Weak<MockChannel>,
    observer: Mutex<Option<Weak<dyn ChannelObserver>>>,
    state: Mutex<MockState>,
}

impl MockChannel {
    pub fn builder(
        transport: TransportKind,
        peer_host: impl Into<String>,
        peer_port: u16,
    ) -> MockChannelBuilder {
        MockChannelBuilder {
            transport,
            peer_host: peer_host.into(),
            peer_port,
            has_name: true,
            bank_id: DEFAULT_BANK_ID.to_string(),
            local_host: "127.0.0.1".to_string(),
            local_port: 0,
        }
    }

    fn observer(&self) -> Option<Arc<dyn ChannelObserver>> {
        self.observer.lock().as_ref().and_then(Weak::upgrade)
    }

    fn as_dyn(&self) -> Option<Arc<dyn Channel>> {
        self.self_weak.upgrade().map(|me| me as Arc<dyn Channel>)
    }

    /// Applies one validated state transition, notifying the observer.
    /// An illegal transition is refused and leaves the state unchanged.
    pub fn transition(&self, next: ChannelState) -> bool {
        let previous = {
            let mut state = self.state.lock();
            if !state.state.can_transition_to(next) {
                warn!(channel = %self.id, from = %state.state, to = %next, "refusing illegal transition");
                return false;
            }
            let previous = state.state;
            state.state = next;
            previous
        };
        if let (Some(observer), Some(me)) = (self.observer(), self.as_dyn()) {
            observer.on_state_changed(&me, previous, next);
        }
        true
    }

    /// Walks the shortest legal path to `target`, notifying each step.
    pub fn drive_to(&self, target: ChannelState) {
        loop {
            let current = self.state.lock().state;
            if current == target {
                return;
            }
            let next = match target {
                ChannelState::Error | ChannelState::Disconnected => target,
                ChannelState::Ready => match current {
                    ChannelState::Init => ChannelState::ResolutionDone,
                    ChannelState::ResolutionInProgress => ChannelState::ResolutionDone,
                    ChannelState::ResolutionDone => ChannelState::Connecting,
                    ChannelState::Connecting | ChannelState::Retry => ChannelState::Ready,
                    _ => target,
                },
                _ => target,
            };
            if !self.transition(next) {
                return;
            }
        }
    }

    /// Reports the oldest queued message as sent, removing it from the
    /// queue first the way a transport drains its output.
    pub fn report_sent_front(&self) -> Option<Message> {
        let message = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                return None;
            }
            state.last_activity = Instant::now();
            Some(state.queue.remove(0))
        }?;
        if let (Some(observer), Some(me)) = (self.observer(), self.as_dyn()) {
            observer.on_message_sent(&me, &message);
        }
        Some(message)
    }

    /// Injects a complete inbound message.
    pub fn deliver(&self, message: Message) {
        self.state.lock().last_activity = Instant::now();
        if let (Some(observer), Some(me)) = (self.observer(), self.as_dyn()) {
            observer.on_message_received(&me, message);
        }
    }

    /// Injects a headers-complete notification.
    pub fn deliver_headers(&self, message: &Message) {
        self.state.lock().last_activity = Instant::now();
        if let (Some(observer), Some(me)) = (self.observer(), self.as_dyn()) {
            observer.on_headers_received(&me, message);
        }
    }

    pub fn set_last_activity(&self, at: Instant) {
        self.state.lock().last_activity = at;
    }

    pub fn fail_next_probe(&self) {
        self.state.lock().fail_next_probe = true;
    }

    pub fn probes(&self) -> Vec<ProbeKind> {
        self.state.lock().probes.clone()
    }

    pub fn opened_hops(&self) -> Vec<Hop> {
        self.state.lock().opened_hops.clone()
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Channel for MockChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn transport(&self) -> TransportKind {
        self.transport
    }

    fn peer_host(&self) -> String {
        self.state.lock().peer_host.clone()
    }

    fn peer_port(&self) -> u16 {
        self.state.lock().peer_port
    }

    fn state(&self) -> ChannelState {
        self.state.lock().state
    }

    fn has_name(&self) -> bool {
        self.state.lock().has_name
    }

    fn bank_id(&self) -> String {
        self.state.lock().bank_id.clone()
    }

    fn about_to_be_closed(&self) -> bool {
        self.state.lock().about_to_be_closed
    }

    fn set_about_to_be_closed(&self, value: bool) {
        self.state.lock().about_to_be_closed = value;
    }

    fn force_closed(&self) -> bool {
        self.state.lock().force_closed
    }

    fn local_host(&self) -> String {
        self.state.lock().local_host.clone()
    }

    fn local_port(&self) -> u16 {
        self.state.lock().local_port
    }

    fn last_activity(&self) -> Instant {
        self.state.lock().last_activity
    }

    fn outgoing_messages(&self) -> Vec<Message> {
        self.state.lock().queue.clone()
    }

    fn queue_message(&self, message: Message) -> Result<()> {
        let mut state = self.state.lock();
        if state.state.is_terminal() {
            return Err(Error::ChannelClosed);
        }
        state.last_activity = Instant::now();
        state.queue.push(message);
        Ok(())
    }

    fn remove_outgoing(&self, id: MessageId) -> bool {
        let mut state = self.state.lock();
        let before = state.queue.len();
        state.queue.retain(|m| m.id() != id);
        state.queue.len() != before
    }

    fn open(&self, hop: &Hop) -> Result<()> {
        self.state.lock().opened_hops.push(hop.clone());
        Ok(())
    }

    fn force_close(&self) {
        let already_terminal = {
            let mut state = self.state.lock();
            state.force_closed = true;
            state.state.is_terminal()
        };
        if !already_terminal {
            self.transition(ChannelState::Disconnected);
        }
    }

    fn send_probe(&self, kind: ProbeKind) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_next_probe {
            state.fail_next_probe = false;
            return Err(Error::ProbeFailed("scripted failure".to_string()));
        }
        state.last_activity = Instant::now();
        state.probes.push(kind);
        Ok(())
    }

    fn set_observer(&self, observer: Weak<dyn ChannelObserver>) {
        *self.observer.lock() = Some(observer);
    }

    fn clear_observer(&self) {
        *self.observer.lock() = None;
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        if let Some(observer) = self.observer() {
            observer.on_channel_destroyed(self.id);
        }
    }
}

/// Factory producing mock channels, optionally from a scripted list.
///
/// Scripted entries let a test hand the dispatch layer a channel it
/// prepared earlier, including one that is already stored, to model a
/// transport multiplexing onto an existing connection.
pub struct MockFactory {
    script: Mutex<Vec<Arc<MockChannel>>>,
    created: Mutex<Vec<Arc<MockChannel>>>,
    fail_next: Mutex<bool>,
}

impl MockFactory {
    pub fn new() -> Self {
        MockFactory {
            script: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
        }
    }

    /// Queues a prepared channel to be returned by the next create call.
    pub fn push_channel(&self, channel: Arc<MockChannel>) {
        self.script.lock().push(channel);
    }

    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn created(&self, index: usize) -> Arc<MockChannel> {
        self.created.lock()[index].clone()
    }
}

impl ChannelFactory for MockFactory {
    fn create_channel(&self, hop: &Hop) -> Result<Arc<dyn Channel>> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(Error::ChannelCreation("scripted failure".to_string()));
        }
        let channel = {
            let mut script = self.script.lock();
            if script.is_empty() {
                MockChannel::builder(hop.transport, hop.host.clone(), hop.port)
                    .bank_id(hop.bank_id.clone())
                    .build()
            } else {
                script.remove(0)
            }
        };
        self.created.lock().push(channel.clone());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoplink_message_core::Method;

    #[test]
    fn illegal_transition_is_refused() {
        let channel = MockChannel::builder(TransportKind::Stream, "h", 80).build();
        channel.drive_to(ChannelState::Ready);
        assert!(!channel.transition(ChannelState::Init));
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[test]
    fn force_close_marks_and_disconnects() {
        let channel = MockChannel::builder(TransportKind::Stream, "h", 80).build();
        channel.drive_to(ChannelState::Ready);
        channel.force_close();
        assert!(channel.force_closed());
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[test]
    fn queue_refused_on_terminal_channel() {
        let channel = MockChannel::builder(TransportKind::Stream, "h", 80).build();
        channel.drive_to(ChannelState::Error);
        let msg = Message::request(Method::Get, "http://h/".parse().unwrap());
        assert_eq!(channel.queue_message(msg), Err(Error::ChannelClosed));
    }

    #[test]
    fn report_sent_front_drains_in_order() {
        let channel = MockChannel::builder(TransportKind::Stream, "h", 80).build();
        let first = Message::request(Method::Get, "http://h/1".parse().unwrap());
        let second = Message::request(Method::Get, "http://h/2".parse().unwrap());
        channel.queue_message(first.clone()).unwrap();
        channel.queue_message(second.clone()).unwrap();
        assert_eq!(channel.report_sent_front().unwrap().id(), first.id());
        assert_eq!(channel.report_sent_front().unwrap().id(), second.id());
        assert!(channel.report_sent_front().is_none());
    }
}
