//! Per-channel request/response correlation
//!
//! One context per channel, holding the requests queued on it (not yet on
//! the wire) and the ones in flight (sent, awaiting a response). Responses
//! match the oldest in-flight request; the pipeline never reorders.

use std::collections::VecDeque;
use std::sync::Arc;

use hoplink_message_core::MessageId;

use crate::request::Request;

#[derive(Default)]
pub(crate) struct RequestContext {
    queued: VecDeque<Arc<Request>>,
    inflight: VecDeque<Arc<Request>>,
}

impl RequestContext {
    pub(crate) fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.inflight.is_empty()
    }

    pub(crate) fn push_queued(&mut self, request: Arc<Request>) {
        self.queued.push_back(request);
    }

    /// Promotes the queued request whose current message is `id` to the
    /// in-flight set. Returns whether a request matched.
    pub(crate) fn mark_sent(&mut self, id: MessageId) -> bool {
        let at = self
            .queued
            .iter()
            .position(|r| r.message_id() == Some(id));
        if let Some(request) = at.and_then(|at| self.queued.remove(at)) {
            self.inflight.push_back(request);
            true
        } else {
            false
        }
    }

    /// The oldest in-flight request, without removing it.
    pub(crate) fn front_inflight(&self) -> Option<Arc<Request>> {
        self.inflight.front().cloned()
    }

    /// Removes and returns the oldest in-flight request; the next inbound
    /// response belongs to it.
    pub(crate) fn pop_inflight(&mut self) -> Option<Arc<Request>> {
        self.inflight.pop_front()
    }

    /// Drops one request from either set. Returns whether it was present.
    pub(crate) fn remove(&mut self, request: &Arc<Request>) -> bool {
        let before = self.queued.len() + self.inflight.len();
        self.queued.retain(|r| !Arc::ptr_eq(r, request));
        self.inflight.retain(|r| !Arc::ptr_eq(r, request));
        self.queued.len() + self.inflight.len() != before
    }

    /// Everything this channel still owes an outcome: in-flight first
    /// (they hit the wire earlier), then queued, de-duplicated by request
    /// identity.
    pub(crate) fn drain_ordered(self) -> Vec<Arc<Request>> {
        let mut out: Vec<Arc<Request>> = Vec::with_capacity(self.inflight.len() + self.queued.len());
        for request in self.inflight.into_iter().chain(self.queued) {
            if !out.iter().any(|r| Arc::ptr_eq(r, &request)) {
                out.push(request);
            }
        }
        out
    }

    /// Splits into (in-flight, queued) preserving order.
    pub(crate) fn split(self) -> (Vec<Arc<Request>>, Vec<Arc<Request>>) {
        (self.inflight.into(), self.queued.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> Arc<Request> {
        Request::get(format!("http://h{}", path).parse().unwrap())
    }

    #[test]
    fn mark_sent_promotes_by_message_id() {
        let mut ctx = RequestContext::default();
        let r1 = request("/1");
        let r2 = request("/2");
        let m1 = r1.build_message();
        let m2 = r2.build_message();
        r1.set_message_id(Some(m1.id()));
        r2.set_message_id(Some(m2.id()));
        ctx.push_queued(r1.clone());
        ctx.push_queued(r2.clone());

        assert!(ctx.mark_sent(m1.id()));
        assert!(Arc::ptr_eq(&ctx.front_inflight().unwrap(), &r1));
        assert!(!ctx.mark_sent(m1.id()));
        assert!(ctx.mark_sent(m2.id()));

        assert!(Arc::ptr_eq(&ctx.pop_inflight().unwrap(), &r1));
        assert!(Arc::ptr_eq(&ctx.pop_inflight().unwrap(), &r2));
    }

    #[test]
    fn drain_puts_inflight_before_queued() {
        let mut ctx = RequestContext::default();
        let sent = request("/sent");
        let waiting = request("/waiting");
        let m = sent.build_message();
        sent.set_message_id(Some(m.id()));
        ctx.push_queued(sent.clone());
        ctx.mark_sent(m.id());
        ctx.push_queued(waiting.clone());

        let drained = ctx.drain_ordered();
        assert_eq!(drained.len(), 2);
        assert!(Arc::ptr_eq(&drained[0], &sent));
        assert!(Arc::ptr_eq(&drained[1], &waiting));
    }
}
