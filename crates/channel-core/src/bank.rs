//! Channel banks: ordered channel collections partitioned by bank identifier
//!
//! Within a bucket, channels whose peer was specified by name order before
//! anonymous inbound ones. The ordering is load-bearing: the hop-less
//! lookup used for inbound dispatch on connectionless listeners scans in
//! bucket order and must prefer named channels for ambiguous destinations.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelId};
use crate::hop::{Hop, TransportKind, DEFAULT_BANK_ID};

fn normalize_bank_id(id: &str) -> &str {
    if id.is_empty() {
        DEFAULT_BANK_ID
    } else {
        id
    }
}

fn is_selectable(channel: &Arc<dyn Channel>) -> bool {
    channel.state().is_selectable() && !channel.about_to_be_closed()
}

/// Owns channels, partitioned by bank identifier.
///
/// A channel appears in at most one bucket of at most one bank; `add` is a
/// no-op for a channel that is already stored. There is deliberately no
/// bound on bucket size: concurrent channels to the same hop grow without
/// limit under load (documented admission-policy tradeoff).
pub struct ChannelBank {
    buckets: Mutex<BTreeMap<String, Vec<Arc<dyn Channel>>>>,
}

impl ChannelBank {
    pub fn new() -> Self {
        ChannelBank {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Inserts a channel into its bucket, keeping named channels ahead of
    /// anonymous ones. Insertion never reorders existing entries.
    pub fn add(&self, channel: Arc<dyn Channel>) {
        let mut buckets = self.buckets.lock();
        let id = channel.id();
        if buckets.values().flatten().any(|c| c.id() == id) {
            trace!(channel = %id, "channel already stored, skipping add");
            return;
        }
        let bucket = buckets
            .entry(normalize_bank_id(&channel.bank_id()).to_string())
            .or_default();
        if channel.has_name() {
            let at = bucket
                .iter()
                .position(|c| !c.has_name())
                .unwrap_or(bucket.len());
            bucket.insert(at, channel);
        } else {
            bucket.push(channel);
        }
    }

    /// Finds a reusable channel for `hop`.
    ///
    /// `resolved_addr` optionally carries the address the hop's name
    /// resolved to, accepted as an alternate peer match.
    pub fn find_for_hop(&self, hop: &Hop, resolved_addr: Option<&str>) -> Option<Arc<dyn Channel>> {
        self.find_for_hop_filtered(hop, resolved_addr, |_| true)
    }

    /// [`ChannelBank::find_for_hop`] with an extra admission predicate; the
    /// dispatch layer uses it to skip busy channels.
    pub fn find_for_hop_filtered(
        &self,
        hop: &Hop,
        resolved_addr: Option<&str>,
        accept: impl Fn(&Arc<dyn Channel>) -> bool,
    ) -> Option<Arc<dyn Channel>> {
        let buckets = self.buckets.lock();
        let bucket = buckets.get(normalize_bank_id(&hop.bank_id))?;
        bucket
            .iter()
            .find(|c| {
                is_selectable(c)
                    && c.transport() == hop.transport
                    && c.peer_port() == hop.port
                    && (c.peer_host() == hop.host
                        || resolved_addr.is_some_and(|addr| c.peer_host() == addr))
                    && accept(c)
            })
            .cloned()
    }

    /// Hop-less lookup for inbound dispatch: scans every bucket in order,
    /// relying on the name-first ordering so that named channels win for
    /// ambiguous destinations.
    pub fn find_for_peer(
        &self,
        transport: TransportKind,
        host: &str,
        port: u16,
    ) -> Option<Arc<dyn Channel>> {
        let buckets = self.buckets.lock();
        buckets
            .values()
            .flatten()
            .find(|c| {
                is_selectable(c)
                    && c.transport() == transport
                    && c.peer_host() == host
                    && c.peer_port() == port
            })
            .cloned()
    }

    /// Locates a channel by its routable local bound address.
    pub fn find_by_local_uri(&self, host: &str, port: u16) -> Option<Arc<dyn Channel>> {
        let buckets = self.buckets.lock();
        buckets
            .values()
            .flatten()
            .find(|c| c.local_port() == port && c.local_host() == host)
            .cloned()
    }

    /// Removes one channel. Survivor order is untouched.
    pub fn remove(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.values_mut() {
            if let Some(at) = bucket.iter().position(|c| c.id() == id) {
                debug!(channel = %id, "removing channel from bank");
                return Some(bucket.remove(at));
            }
        }
        None
    }

    /// Removes every channel matching `predicate` and returns them, in
    /// bucket order. Used by the periodic idle-channel reaper.
    pub fn remove_if(
        &self,
        predicate: impl Fn(&Arc<dyn Channel>) -> bool,
    ) -> Vec<Arc<dyn Channel>> {
        let mut buckets = self.buckets.lock();
        let mut removed = Vec::new();
        for bucket in buckets.values_mut() {
            let mut kept = Vec::with_capacity(bucket.len());
            for channel in bucket.drain(..) {
                if predicate(&channel) {
                    removed.push(channel);
                } else {
                    kept.push(channel);
                }
            }
            *bucket = kept;
        }
        removed
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.buckets.lock().values().flatten().any(|c| c.id() == id)
    }

    /// Snapshot of every stored channel, in bucket order.
    pub fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.buckets.lock().values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }
}

impl Default for ChannelBank {
    fn default() -> Self {
        ChannelBank::new()
    }
}
