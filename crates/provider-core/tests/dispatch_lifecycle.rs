//! Dispatch lifecycle tests
//!
//! Channel selection and admission, request-line rewriting, and the plain
//! (continuation-free) response path.

mod common;

use bytes::Bytes;
use common::{harness, harness_with_config, response, RecordingListener, RecordingTasks};
use std::sync::Arc;

use hoplink_channel_core::{Channel, ChannelState, TransportKind};
use hoplink_message_core::{Method, StatusCode};
use hoplink_provider_core::{Error, ProviderConfig, Request};

/// A busy channel is never reused: a second request to the same hop gets a
/// channel of its own.
#[test]
fn busy_hop_allocates_a_distinct_channel() {
    let h = harness();
    let first = Request::get("http://example.com/a".parse().unwrap());
    let second = Request::get("http://example.com/b".parse().unwrap());

    h.provider.send_request(&first).unwrap();
    h.provider.send_request(&second).unwrap();

    assert_eq!(h.factory.created_count(), 2);
    assert_eq!(h.provider.bank(TransportKind::Stream).len(), 2);
}

/// Once an exchange completes the channel is idle again and gets reused.
#[test]
fn idle_channel_is_reused() {
    let h = harness();
    let listener = RecordingListener::new();
    let first = Request::get("http://example.com/a".parse().unwrap());
    h.provider
        .send_request_with_listener(&first, listener.clone())
        .unwrap();

    let channel = h.factory.created(0);
    channel.report_sent_front().unwrap();
    channel.deliver(response(200, &[]));
    assert_eq!(listener.response_statuses(), vec![StatusCode::OK]);

    let second = Request::get("http://example.com/b".parse().unwrap());
    h.provider.send_request(&second).unwrap();
    assert_eq!(h.factory.created_count(), 1);
    assert_eq!(channel.queued_count(), 1);
}

/// The request line is rewritten to origin-form with the authority moved
/// into a Host header; the absolute target is remembered for later passes.
#[test]
fn request_line_is_split_once() {
    let h = harness();
    let request = Request::get("http://example.com:8080/dir/page?x=1".parse().unwrap());
    h.provider.send_request(&request).unwrap();

    let channel = h.factory.created(0);
    let queued = channel.outgoing_messages();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].target().unwrap().to_string(), "/dir/page?x=1");
    assert_eq!(queued[0].header("Host"), Some("example.com:8080"));
    assert_eq!(
        request.original_uri().unwrap().to_string(),
        "http://example.com:8080/dir/page?x=1"
    );
}

/// A body without an explicit length gets a Content-Length header.
#[test]
fn content_length_is_added_for_bodies() {
    let h = harness();
    let request = Request::builder(Method::Post, "http://example.com/submit".parse().unwrap())
        .body(Bytes::from_static(b"hello"))
        .build();
    h.provider.send_request(&request).unwrap();

    let queued = h.factory.created(0).outgoing_messages();
    assert_eq!(queued[0].header("Content-Length"), Some("5"));
}

/// An explicit Content-Length is left alone.
#[test]
fn explicit_content_length_is_preserved() {
    let h = harness();
    let request = Request::builder(Method::Post, "http://example.com/submit".parse().unwrap())
        .header("Content-Length", "5")
        .body(Bytes::from_static(b"hello"))
        .build();
    h.provider.send_request(&request).unwrap();

    let queued = h.factory.created(0).outgoing_messages();
    let lengths: Vec<&str> = queued[0]
        .header_values("Content-Length")
        .into_iter()
        .collect();
    assert_eq!(lengths, vec!["5"]);
}

/// A target with no host fails fast without touching the factory.
#[test]
fn missing_host_fails_fast() {
    let h = harness();
    let request = Request::get(hoplink_message_core::Uri::new("http", ""));
    assert_eq!(h.provider.send_request(&request), Err(Error::MissingHost));
    assert_eq!(h.factory.created_count(), 0);
}

/// A scheme outside http/https is refused outright.
#[test]
fn unsupported_transport_is_refused() {
    let h = harness();
    let request = Request::get("ftp://example.com/file".parse().unwrap());
    assert_eq!(
        h.provider.send_request(&request),
        Err(Error::UnsupportedTransport("ftp".to_string()))
    );
}

/// A supported but disabled transport is an explicit error.
#[test]
fn disabled_transport_is_refused() {
    let h = harness_with_config(ProviderConfig::default().with_secure_stream_enabled(false));
    let request = Request::get("https://example.com/".parse().unwrap());
    assert_eq!(
        h.provider.send_request(&request),
        Err(Error::TransportDisabled("TLS".to_string()))
    );
}

/// Requests carrying a bank identifier get channels partitioned by it.
#[test]
fn bank_identifier_partitions_channels() {
    let h = harness();
    let pooled = Request::builder(Method::Get, "http://example.com/a".parse().unwrap())
        .bank_id("pool-a")
        .build();
    h.provider.send_request(&pooled).unwrap();

    let channel = h.factory.created(0);
    assert_eq!(channel.bank_id(), "pool-a");

    // The pooled channel finishes its exchange and sits idle.
    channel.report_sent_front().unwrap();
    channel.deliver(response(200, &[]));

    // A default-bank request to the same hop must not reuse it.
    let plain = Request::get("http://example.com/b".parse().unwrap());
    h.provider.send_request(&plain).unwrap();
    assert_eq!(h.factory.created_count(), 2);
}

/// The headers hook fires before the full response lands.
#[test]
fn headers_hook_fires_for_oldest_in_flight_request() {
    let h = harness();
    let listener = RecordingListener::new();
    let request = Request::get("http://example.com/a".parse().unwrap());
    h.provider
        .send_request_with_listener(&request, listener.clone())
        .unwrap();

    let channel = h.factory.created(0);
    channel.report_sent_front().unwrap();
    let resp = response(200, &[]);
    channel.deliver_headers(&resp);
    assert_eq!(*listener.headers_seen.lock(), 1);
    assert!(listener.responses.lock().is_empty());

    channel.deliver(resp);
    assert_eq!(listener.response_statuses(), vec![StatusCode::OK]);
}

/// A response with no in-flight request is dropped, not misrouted.
#[test]
fn unmatched_response_is_dropped() {
    let h = harness();
    let listener = RecordingListener::new();
    let request = Request::get("http://example.com/a".parse().unwrap());
    h.provider
        .send_request_with_listener(&request, listener.clone())
        .unwrap();

    // Nothing was reported sent yet, so nothing is in flight.
    let channel = h.factory.created(0);
    channel.deliver(response(200, &[]));
    assert!(listener.is_silent());
}

/// Background tasks span the exchange, including internal retries.
#[test]
fn background_task_spans_the_exchange() {
    let h = harness();
    let tasks = Arc::new(RecordingTasks::default());
    h.provider.set_task_manager(tasks.clone());

    let listener = RecordingListener::new();
    let request = Request::builder(Method::Get, "http://example.com/a".parse().unwrap())
        .background_task("fetch")
        .build();
    h.provider
        .send_request_with_listener(&request, listener.clone())
        .unwrap();
    assert_eq!(tasks.begun.lock().len(), 1);
    assert_eq!(tasks.begun.lock()[0].1, "fetch");
    assert!(tasks.ended.lock().is_empty());

    // Unexpected disconnect: the resubmission keeps the same task handle.
    let first = h.factory.created(0);
    first.drive_to(ChannelState::Disconnected);
    assert_eq!(tasks.begun.lock().len(), 1);

    let second = h.factory.created(1);
    second.report_sent_front().unwrap();
    second.deliver(response(200, &[]));
    assert_eq!(listener.response_statuses(), vec![StatusCode::OK]);
    assert_eq!(tasks.ended.lock().len(), 1);
    assert_eq!(tasks.begun.lock()[0].0, tasks.ended.lock()[0]);
}

/// Requests without a task name never touch the task manager.
#[test]
fn tasks_skipped_without_a_name() {
    let h = harness();
    let tasks = Arc::new(RecordingTasks::default());
    h.provider.set_task_manager(tasks.clone());

    let request = Request::get("http://example.com/a".parse().unwrap());
    h.provider.send_request(&request).unwrap();
    assert!(tasks.begun.lock().is_empty());
}
