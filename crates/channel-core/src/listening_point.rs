//! Listening points: the local-endpoint side of the channel layer
//!
//! A listening point owns the channel bank for one local bound address.
//! It creates channels on demand for outbound hops, registers accepted
//! inbound connections, and runs the periodic maintenance: keep-alive
//! probing of idle channels and reaping of unreliable channels that have
//! gone quiet.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bank::ChannelBank;
use crate::channel::{Channel, ChannelFactory, ChannelObserver, ProbeKind};
use crate::error::Result;
use crate::hop::{Hop, TransportKind};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::state::ChannelState;

/// Maintenance tuning for a listening point.
#[derive(Debug, Clone)]
pub struct ListeningPointConfig {
    /// Cadence of keep-alive probes over idle Ready channels.
    pub keep_alive_interval: Duration,
    /// Ready channels quiet for longer than this are reaped.
    pub unreliable_channel_timeout: Duration,
    /// Cadence of the idle-channel reaper.
    pub reap_interval: Duration,
}

impl Default for ListeningPointConfig {
    fn default() -> Self {
        ListeningPointConfig {
            keep_alive_interval: Duration::from_secs(30),
            unreliable_channel_timeout: Duration::from_secs(120),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl ListeningPointConfig {
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_unreliable_channel_timeout(mut self, timeout: Duration) -> Self {
        self.unreliable_channel_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}

/// One local bound address and the channels attached to it.
#[derive(Clone)]
pub struct ListeningPoint {
    inner: Arc<ListeningPointInner>,
}

struct ListeningPointInner {
    transport: TransportKind,
    local_host: String,
    local_port: u16,
    bank: ChannelBank,
    factory: Arc<dyn ChannelFactory>,
    observer: Mutex<Option<Weak<dyn ChannelObserver>>>,
    config: ListeningPointConfig,
    timers: Mutex<Vec<TimerHandle>>,
}

impl ListeningPoint {
    pub fn new(
        transport: TransportKind,
        local_host: impl Into<String>,
        local_port: u16,
        factory: Arc<dyn ChannelFactory>,
        config: ListeningPointConfig,
    ) -> Self {
        let local_host = local_host.into();
        info!(%transport, host = %local_host, port = local_port, "creating listening point");
        ListeningPoint {
            inner: Arc::new(ListeningPointInner {
                transport,
                local_host,
                local_port,
                bank: ChannelBank::new(),
                factory,
                observer: Mutex::new(None),
                config,
                timers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.inner.transport
    }

    pub fn local_host(&self) -> &str {
        &self.inner.local_host
    }

    pub fn local_port(&self) -> u16 {
        self.inner.local_port
    }

    pub fn bank(&self) -> &ChannelBank {
        &self.inner.bank
    }

    /// Sets the observer attached to every channel this point creates or
    /// registers from now on.
    pub fn set_observer(&self, observer: Weak<dyn ChannelObserver>) {
        *self.inner.observer.lock() = Some(observer);
    }

    fn current_observer(&self) -> Option<Weak<dyn ChannelObserver>> {
        self.inner.observer.lock().clone()
    }

    /// Creates, registers and opens a channel towards `hop`.
    pub fn create_channel(&self, hop: &Hop) -> Result<Arc<dyn Channel>> {
        let channel = self.inner.factory.create_channel(hop)?;
        debug!(channel = %channel.id(), %hop, "created channel");
        if let Some(observer) = self.current_observer() {
            channel.set_observer(observer);
        }
        self.inner.bank.add(channel.clone());
        channel.open(hop)?;
        Ok(channel)
    }

    /// Registers an accepted inbound connection.
    pub fn register_inbound(&self, channel: Arc<dyn Channel>) {
        debug!(channel = %channel.id(), peer = %channel.peer_host(), "registering inbound channel");
        if let Some(observer) = self.current_observer() {
            channel.set_observer(observer);
        }
        self.inner.bank.add(channel);
    }

    /// Locates a channel by its routable local bound address.
    pub fn channel_for_local_uri(&self, host: &str, port: u16) -> Option<Arc<dyn Channel>> {
        self.inner.bank.find_by_local_uri(host, port)
    }

    /// Reaps Ready channels whose last activity is older than the
    /// unreliable-channel timeout. Each one is force-closed before removal.
    /// Returns how many were reaped.
    pub fn clean_unreliable_channels(&self) -> usize {
        let timeout = self.inner.config.unreliable_channel_timeout;
        let idle: Vec<Arc<dyn Channel>> = self
            .inner
            .bank
            .channels()
            .into_iter()
            .filter(|c| c.state() == ChannelState::Ready && c.last_activity().elapsed() >= timeout)
            .collect();
        for channel in &idle {
            warn!(channel = %channel.id(), "reaping idle unreliable channel");
            channel.set_about_to_be_closed(true);
            channel.force_close();
            self.inner.bank.remove(channel.id());
        }
        idle.len()
    }

    /// Probes every Ready channel with an idle output queue. Channels whose
    /// probe write fails are queued for force-close after the iteration
    /// completes; the bank is never mutated mid-scan.
    pub fn send_keep_alive(&self) -> usize {
        self.probe_idle_channels(ProbeKind::Ping)
    }

    /// Same iteration as [`ListeningPoint::send_keep_alive`] with a pong
    /// probe payload.
    pub fn send_pong(&self) -> usize {
        self.probe_idle_channels(ProbeKind::Pong)
    }

    fn probe_idle_channels(&self, kind: ProbeKind) -> usize {
        let mut probed = 0;
        let mut failed: Vec<Arc<dyn Channel>> = Vec::new();
        for channel in self.inner.bank.channels() {
            if channel.state() != ChannelState::Ready || !channel.outgoing_messages().is_empty() {
                continue;
            }
            match channel.send_probe(kind) {
                Ok(()) => probed += 1,
                Err(e) => {
                    warn!(channel = %channel.id(), error = %e, "probe write failed");
                    channel.set_about_to_be_closed(true);
                    failed.push(channel);
                }
            }
        }
        for channel in failed {
            channel.force_close();
            self.inner.bank.remove(channel.id());
        }
        probed
    }

    /// Registers the keep-alive and reaper timers on `scheduler`. The
    /// timers live as long as this listening point.
    pub fn start_maintenance(&self, scheduler: &dyn Scheduler) {
        let keep_alive = {
            let weak = Arc::downgrade(&self.inner);
            scheduler.schedule_repeating(
                "keep-alive",
                self.inner.config.keep_alive_interval,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        ListeningPoint { inner }.send_keep_alive();
                    }
                }),
            )
        };
        let reaper = {
            let weak = Arc::downgrade(&self.inner);
            scheduler.schedule_repeating(
                "channel-reaper",
                self.inner.config.reap_interval,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        ListeningPoint { inner }.clean_unreliable_channels();
                    }
                }),
            )
        };
        let mut timers = self.inner.timers.lock();
        timers.push(keep_alive);
        timers.push(reaper);
    }
}
