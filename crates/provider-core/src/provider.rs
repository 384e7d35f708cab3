//! The provider: channel selection and request lifecycle
//!
//! One provider owns two channel banks (plain stream and TLS), a factory
//! to create channels through, and the per-channel request contexts. It is
//! the single [`ChannelObserver`] for every channel it uses; admission,
//! correlation, continuation and recovery all funnel through the
//! observer callbacks here.
//!
//! ## Admission
//!
//! A channel is busy while it has queued outgoing messages or unresolved
//! in-flight requests. Busy channels are never reused: a concurrent
//! request to the same hop gets a fresh channel. Nothing bounds how many
//! channels one hop can accumulate under load; callers rely on requests
//! never being serialized behind one another.
//!
//! ## Failure policy
//!
//! The state machine's terminal transitions are handled in exactly one
//! place ([`ProviderInner::on_state_changed`]): a channel `Error` fails
//! every associated request; an unexpected `Disconnected` resubmits each of
//! them once, then fails; a force-closed channel (cancellation, reaping)
//! fails pending requests without treating the teardown itself as an error.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use hoplink_channel_core::{
    Channel, ChannelBank, ChannelFactory, ChannelId, ChannelObserver, ChannelState, Hop, Scheduler,
    TransportKind,
};
use hoplink_message_core::{header, Message};

use crate::auth;
use crate::config::ProviderConfig;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::listener::ResponseListener;
use crate::redirect;
use crate::request::Request;
use crate::tasks::BackgroundTaskManager;

/// What a continuation decided to do with a response.
pub(crate) enum Continuation {
    /// The request went back out; the caller sees nothing yet.
    Resubmitted,
    /// Hand the response to the caller.
    Deliver(Message),
    /// Surface a failure to the caller.
    Fail(Error),
}

/// Client-side dispatch entry point.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

pub(crate) struct ProviderInner {
    config: ProviderConfig,
    stream_bank: ChannelBank,
    secure_bank: ChannelBank,
    factory: Arc<dyn ChannelFactory>,
    scheduler: Arc<dyn Scheduler>,
    tasks: Mutex<Option<Arc<dyn BackgroundTaskManager>>>,
    contexts: Mutex<HashMap<ChannelId, RequestContext>>,
    self_weak: Weak<ProviderInner>,
}

impl Provider {
    pub fn new(factory: Arc<dyn ChannelFactory>, scheduler: Arc<dyn Scheduler>) -> Self {
        Provider::with_config(factory, scheduler, ProviderConfig::default())
    }

    pub fn with_config(
        factory: Arc<dyn ChannelFactory>,
        scheduler: Arc<dyn Scheduler>,
        config: ProviderConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| ProviderInner {
            config,
            stream_bank: ChannelBank::new(),
            secure_bank: ChannelBank::new(),
            factory,
            scheduler,
            tasks: Mutex::new(None),
            contexts: Mutex::new(HashMap::new()),
            self_weak: weak.clone(),
        });
        Provider { inner }
    }

    /// Attaches the background-task manager used for requests that carry a
    /// task name.
    pub fn set_task_manager(&self, tasks: Arc<dyn BackgroundTaskManager>) {
        *self.inner.tasks.lock() = Some(tasks);
    }

    /// Dispatches a request. See the module docs for the full lifecycle.
    pub fn send_request(&self, request: &Arc<Request>) -> Result<()> {
        self.inner.send_request(request)
    }

    /// Dispatches a request with a listener attached first.
    pub fn send_request_with_listener(
        &self,
        request: &Arc<Request>,
        listener: Arc<dyn ResponseListener>,
    ) -> Result<()> {
        request.set_listener(listener);
        self.inner.send_request(request)
    }

    /// Cancels a request.
    ///
    /// The cancelled flag is set before this returns; channel teardown and
    /// the requeue of sibling requests run from a later event-loop
    /// iteration. The cancelled request fires no further callbacks.
    pub fn cancel(&self, request: &Arc<Request>) {
        self.inner.cancel(request)
    }

    /// The channel bank for one transport kind.
    pub fn bank(&self, transport: TransportKind) -> &ChannelBank {
        self.inner.bank_for(transport)
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }
}

impl ProviderInner {
    pub(crate) fn bank_for(&self, transport: TransportKind) -> &ChannelBank {
        match transport {
            TransportKind::Stream => &self.stream_bank,
            TransportKind::SecureStream => &self.secure_bank,
        }
    }

    fn transport_enabled(&self, transport: TransportKind) -> bool {
        match transport {
            TransportKind::Stream => self.config.enable_stream,
            TransportKind::SecureStream => self.config.enable_secure_stream,
        }
    }

    fn observer_handle(&self) -> Weak<dyn ChannelObserver> {
        let weak: Weak<dyn ChannelObserver> = self.self_weak.clone();
        weak
    }

    pub(crate) fn send_request(&self, request: &Arc<Request>) -> Result<()> {
        if request.cancelled() {
            return Err(Error::Cancelled);
        }

        // The hop always comes from the absolute target; after the request
        // line was split that is the remembered original URI.
        let target = request.original_uri().unwrap_or_else(|| request.uri());
        if target.host().is_empty() {
            return Err(Error::MissingHost);
        }
        let mut hop = Hop::from_uri(&target)?;
        if let Some(bank_id) = request.bank_id() {
            hop = hop.with_bank_id(bank_id);
        }

        let bank = self.bank_for(hop.transport);
        let channel = match bank.find_for_hop_filtered(&hop, None, |c| !self.is_busy(c)) {
            Some(channel) => {
                trace!(channel = %channel.id(), %hop, "reusing idle channel");
                channel
            }
            None => self.create_channel(&hop)?,
        };

        // First pass only: split the absolute target into origin-form plus
        // a Host header. A continuation resubmission must not re-split.
        if request.original_uri().is_none() {
            let absolute = request.uri();
            request.set_header(header::HOST, absolute.host_port());
            request.set_uri(absolute.to_origin());
            request.set_original_uri(absolute);
        }

        if request.body_len() > 0 && request.header(header::CONTENT_LENGTH).is_none() {
            request.set_header(header::CONTENT_LENGTH, request.body_len().to_string());
        }

        let message = request.build_message();
        request.set_message_id(Some(message.id()));
        request.attach_channel(Arc::downgrade(&channel));
        self.contexts
            .lock()
            .entry(channel.id())
            .or_default()
            .push_queued(request.clone());

        if let Err(e) = channel.queue_message(message) {
            if let Some(ctx) = self.contexts.lock().get_mut(&channel.id()) {
                ctx.remove(request);
            }
            request.detach();
            return Err(e.into());
        }

        self.begin_background_task(request);
        debug!(channel = %channel.id(), %hop, method = %request.method(), "request queued");
        Ok(())
    }

    fn is_busy(&self, channel: &Arc<dyn Channel>) -> bool {
        if !channel.outgoing_messages().is_empty() {
            return true;
        }
        self.contexts
            .lock()
            .get(&channel.id())
            .map_or(false, |ctx| !ctx.is_empty())
    }

    fn create_channel(&self, hop: &Hop) -> Result<Arc<dyn Channel>> {
        if !self.transport_enabled(hop.transport) {
            return Err(Error::TransportDisabled(hop.transport.name().to_string()));
        }
        let channel = self.factory.create_channel(hop)?;
        channel.set_observer(self.observer_handle());
        self.bank_for(hop.transport).add(channel.clone());
        channel.open(hop)?;
        info!(channel = %channel.id(), %hop, "created channel");
        Ok(channel)
    }

    pub(crate) fn cancel(&self, request: &Arc<Request>) {
        request.set_cancelled();
        info!("request cancelled");
        let weak = self.self_weak.clone();
        let request = request.clone();
        self.scheduler.do_later(
            "cancel-teardown",
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.cancel_teardown(&request);
                }
            }),
        );
    }

    /// Cancellation teardown: a partially-dispatched request cannot be
    /// safely left on a live channel, so the whole channel goes, and its
    /// other queued requests move to freshly selected channels.
    fn cancel_teardown(&self, request: &Arc<Request>) {
        let Some(channel) = request.channel() else {
            self.release(request);
            return;
        };
        if let Some(id) = request.message_id() {
            channel.remove_outgoing(id);
        }

        let (inflight, queued) = match self.contexts.lock().remove(&channel.id()) {
            Some(ctx) => ctx.split(),
            None => (Vec::new(), Vec::new()),
        };
        self.detach_channel(&channel);
        channel.force_close();

        for sibling in queued {
            if Arc::ptr_eq(&sibling, request) || sibling.cancelled() {
                continue;
            }
            debug!("requeueing sibling of cancelled request");
            if let Err(e) = self.send_request(&sibling) {
                self.fail_request(&sibling, e);
            }
        }
        // An in-flight sibling cannot be replayed safely; unblock its
        // listener instead.
        for sibling in inflight {
            if Arc::ptr_eq(&sibling, request) || sibling.cancelled() {
                continue;
            }
            self.fail_request(&sibling, Error::Io("channel closed by cancellation".to_string()));
        }

        self.release(request);
    }

    fn take_channel_requests(&self, channel: &Arc<dyn Channel>) -> Vec<Arc<Request>> {
        self.contexts
            .lock()
            .remove(&channel.id())
            .map(RequestContext::drain_ordered)
            .unwrap_or_default()
    }

    fn detach_channel(&self, channel: &Arc<dyn Channel>) {
        self.bank_for(channel.transport()).remove(channel.id());
        channel.clear_observer();
    }

    fn discard_channel_requests(&self, channel: &Arc<dyn Channel>) {
        let requests = self.take_channel_requests(channel);
        self.detach_channel(channel);
        for request in requests {
            self.release(&request);
        }
    }

    fn handle_channel_failure(&self, channel: &Arc<dyn Channel>, reason: &str) {
        let requests = self.take_channel_requests(channel);
        self.detach_channel(channel);
        for request in requests {
            if request.cancelled() {
                self.release(&request);
                continue;
            }
            self.fail_request(&request, Error::Io(reason.to_string()));
        }
    }

    /// An unexpected disconnect is a normal, recoverable event (idle
    /// timeout close by the peer): every associated request is resent,
    /// once. A request that already used its allowance fails instead.
    fn resubmit_channel_requests(&self, channel: &Arc<dyn Channel>) {
        let requests = self.take_channel_requests(channel);
        self.detach_channel(channel);
        for request in requests {
            if request.cancelled() {
                self.release(&request);
                continue;
            }
            if request.mark_resubmitted() {
                debug!("resubmitting request after disconnection");
                request.detach();
                if let Err(e) = self.send_request(&request) {
                    self.fail_request(&request, e);
                }
            } else {
                self.fail_request(
                    &request,
                    Error::Io("channel disconnected after resubmission".to_string()),
                );
            }
        }
    }

    fn handle_response(&self, channel: &Arc<dyn Channel>, response: Message) {
        let request = self
            .contexts
            .lock()
            .get_mut(&channel.id())
            .and_then(RequestContext::pop_inflight);
        let Some(request) = request else {
            warn!(channel = %channel.id(), "response without a pending request, dropping");
            return;
        };
        if request.cancelled() {
            debug!("dropping response for cancelled request");
            self.release(&request);
            return;
        }

        let status = response.status();
        let outcome = if status.is_some_and(|s| s.is_auth_challenge()) {
            auth::continue_authentication(self, &request, response)
        } else if status.is_some_and(|s| s.is_followable_redirect())
            && response.header(header::LOCATION).is_some()
        {
            redirect::continue_redirect(self, &request, response)
        } else {
            Continuation::Deliver(response)
        };

        match outcome {
            Continuation::Resubmitted => {}
            Continuation::Deliver(response) => self.deliver_response(&request, response),
            Continuation::Fail(error) => self.fail_request(&request, error),
        }
    }

    fn deliver_response(&self, request: &Arc<Request>, response: Message) {
        self.release(request);
        if let Some(listener) = request.listener() {
            listener.on_response(request, response);
        }
    }

    fn fail_request(&self, request: &Arc<Request>, error: Error) {
        warn!(error = %error, "request failed");
        self.release(request);
        if let Some(listener) = request.listener() {
            listener.on_io_error(request, error);
        }
    }

    /// Drops dispatch-time references and ends the background task.
    fn release(&self, request: &Arc<Request>) {
        self.end_background_task(request);
        request.detach();
    }

    fn begin_background_task(&self, request: &Arc<Request>) {
        let tasks = self.tasks.lock().clone();
        let Some(tasks) = tasks else { return };
        if request.task_id().is_some() {
            // Still held from a previous pass of the same exchange.
            return;
        }
        if let Some(name) = request.task_name() {
            request.set_task_id(Some(tasks.begin(&name)));
        }
    }

    fn end_background_task(&self, request: &Arc<Request>) {
        let tasks = self.tasks.lock().clone();
        if let (Some(tasks), Some(id)) = (tasks, request.take_task_id()) {
            tasks.end(id);
        }
    }
}

impl ChannelObserver for ProviderInner {
    fn on_state_changed(
        &self,
        channel: &Arc<dyn Channel>,
        previous: ChannelState,
        current: ChannelState,
    ) {
        trace!(channel = %channel.id(), %previous, %current, "channel state changed");
        match current {
            ChannelState::Error => {
                if channel.force_closed() {
                    // Error noise from our own teardown is not a failure of
                    // the requests; the cancel path already settled them.
                    self.discard_channel_requests(channel);
                } else {
                    self.handle_channel_failure(channel, "channel entered error state");
                }
            }
            ChannelState::Disconnected => {
                if channel.force_closed() {
                    // Deliberate teardown; pending listeners are unblocked,
                    // nothing is replayed.
                    self.handle_channel_failure(channel, "channel closed");
                } else {
                    self.resubmit_channel_requests(channel);
                }
            }
            _ => {}
        }
    }

    fn on_message_sent(&self, channel: &Arc<dyn Channel>, message: &Message) {
        let mut contexts = self.contexts.lock();
        if let Some(ctx) = contexts.get_mut(&channel.id()) {
            if !ctx.mark_sent(message.id()) {
                trace!(channel = %channel.id(), "sent message had no queued request");
            }
        }
    }

    fn on_headers_received(&self, channel: &Arc<dyn Channel>, message: &Message) {
        if !message.is_response() {
            return;
        }
        let request = self
            .contexts
            .lock()
            .get(&channel.id())
            .and_then(RequestContext::front_inflight);
        if let Some(request) = request {
            if !request.cancelled() {
                if let Some(listener) = request.listener() {
                    listener.on_response_headers(&request, message);
                }
            }
        }
    }

    fn on_message_received(&self, channel: &Arc<dyn Channel>, message: Message) {
        if message.is_response() {
            self.handle_response(channel, message);
        } else {
            // Server-side delivery belongs to the listening-point owner,
            // not the client dispatch path.
            debug!(channel = %channel.id(), "ignoring inbound request on client channel");
        }
    }

    fn on_channel_destroyed(&self, channel: ChannelId) {
        trace!(%channel, "channel destroyed");
        self.contexts.lock().remove(&channel);
        self.stream_bank.remove(channel);
        self.secure_bank.remove(channel);
    }
}
