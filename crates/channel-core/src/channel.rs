//! The channel seam between this crate and the concrete transports
//!
//! A channel is one physical connection. The transport implements
//! [`Channel`]; everything above observes it through [`ChannelObserver`].
//! All observer methods are invoked synchronously on the event-loop thread:
//! no two callbacks belonging to this stack ever run concurrently, and a
//! callback is free to re-enter the dispatch layer directly.
//!
//! Connection establishment is asynchronous *inside* the transport:
//! [`Channel::open`] only starts it, and progress arrives as
//! [`ChannelObserver::on_state_changed`] notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use hoplink_message_core::{Message, MessageId};

use crate::error::Result;
use crate::hop::{Hop, TransportKind};
use crate::state::ChannelState;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique channel identity, assigned at construction.
///
/// Peer address is not an identity: the admission policy deliberately
/// allows several concurrent channels to the same hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocates the next id. Transports call this once per connection.
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Kind of transport-level probe write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Unsolicited keep-alive.
    Ping,
    /// Answer to a peer's keep-alive.
    Pong,
}

/// One physical connection, implemented by a transport.
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn transport(&self) -> TransportKind;

    /// Peer host as this side knows it: the name it connected to, or the
    /// source address of an accepted connection.
    fn peer_host(&self) -> String;

    fn peer_port(&self) -> u16;

    fn state(&self) -> ChannelState;

    /// True when the peer was specified by name rather than learned from an
    /// inbound connection. Named channels are preferred for ambiguous
    /// lookups and sort first in their bank bucket.
    fn has_name(&self) -> bool;

    fn bank_id(&self) -> String;

    /// Set while the channel is queued for closing; such a channel must not
    /// be picked for new exchanges.
    fn about_to_be_closed(&self) -> bool;

    fn set_about_to_be_closed(&self, value: bool);

    /// True once [`Channel::force_close`] was called; distinguishes a
    /// deliberate teardown from a peer-initiated disconnection.
    fn force_closed(&self) -> bool;

    /// Host of the routable local bound address.
    fn local_host(&self) -> String;

    fn local_port(&self) -> u16;

    /// Instant of the last observed read or write activity.
    fn last_activity(&self) -> Instant;

    /// Snapshot of the not-yet-sent outgoing queue, oldest first.
    fn outgoing_messages(&self) -> Vec<Message>;

    /// Appends a message to the outgoing queue. The transport sends it when
    /// the channel reaches `Ready` and reports it via
    /// [`ChannelObserver::on_message_sent`].
    fn queue_message(&self, message: Message) -> Result<()>;

    /// Drops a queued, not-yet-sent message. Returns whether it was found.
    fn remove_outgoing(&self, id: MessageId) -> bool;

    /// Starts connection establishment towards `hop`.
    fn open(&self, hop: &Hop) -> Result<()>;

    /// Deliberately tears the connection down. The transport reports the
    /// resulting `Disconnected` transition with [`Channel::force_closed`]
    /// returning true.
    fn force_close(&self);

    /// Transport-level keep-alive write.
    fn send_probe(&self, kind: ProbeKind) -> Result<()>;

    /// Attaches the single observer. The channel holds it weakly and must
    /// drop the reference when destroyed.
    fn set_observer(&self, observer: Weak<dyn ChannelObserver>);

    fn clear_observer(&self);
}

/// Receives channel events, one method per event.
///
/// Implementations must tolerate re-entrancy into their own public API
/// from within a callback but will never be called from two threads at
/// once.
pub trait ChannelObserver: Send + Sync {
    /// The transport reported a (validated) state transition.
    fn on_state_changed(
        &self,
        channel: &Arc<dyn Channel>,
        previous: ChannelState,
        current: ChannelState,
    );

    /// A queued message left the outgoing queue onto the wire.
    fn on_message_sent(&self, channel: &Arc<dyn Channel>, message: &Message);

    /// Response headers are complete; the body may still be in flight.
    fn on_headers_received(&self, channel: &Arc<dyn Channel>, message: &Message);

    /// A complete message arrived.
    fn on_message_received(&self, channel: &Arc<dyn Channel>, message: Message);

    /// The channel's last reference is going away; any bookkeeping keyed on
    /// its id must be dropped now rather than on finalizer timing.
    fn on_channel_destroyed(&self, channel: ChannelId);
}

/// Creates channels for a transport kind; the seam a [`crate::ListeningPoint`]
/// and the dispatch layer use to stay transport-agnostic.
pub trait ChannelFactory: Send + Sync {
    /// Creates a channel aimed at `hop`, tagged with the hop's bank
    /// identifier. The returned channel is not yet opened.
    fn create_channel(&self, hop: &Hop) -> Result<Arc<dyn Channel>>;
}
