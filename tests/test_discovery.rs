//! Integration tests for SAP discovery and session lifecycle.
//!
//! Drives the discovery handler with crafted SAP datagrams against a
//! recording mock sink: creation, idempotent refresh, goodbye,
//! capacity, and liveness reaping.


use std::sync::Arc;
use std::time::Duration;

use mock_sink::{sap_datagram, sdp_body, MockSink};
use rtp_recv::{MetricsContext, RtpRecv};

const SINK_LATENCY: u64 = 100_000;

fn receiver(sink: Arc<MockSink>) -> RtpRecv {
    // ---
    RtpRecv::bind(
        "127.0.0.1:0".parse().expect("addr"),
        sink,
        MetricsContext::new().expect("metrics"),
    )
    .expect("bind failed")
}

fn announce(origin: &str, port: u16) -> Vec<u8> {
    // ---
    sap_datagram(&sdp_body(origin, "test stream", "127.0.0.1", port, 127), false)
}

fn goodbye(origin: &str, port: u16) -> Vec<u8> {
    // ---
    sap_datagram(&sdp_body(origin, "test stream", "127.0.0.1", port, 127), true)
}

fn secs(s: u64) -> Duration {
    // ---
    Duration::from_secs(s)
}

#[tokio::test]
async fn test_announcement_creates_one_session() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));

    assert_eq!(recv.session_count(), 1);
    assert_eq!(sink.connected(), 1);
    assert_eq!(
        sink.last_input().expect("input").name,
        "RTP Stream (test stream)"
    );
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    for i in 0..5 {
        recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1 + i));
    }

    // One session, one sink connection; repeats only touched the clock.
    assert_eq!(recv.session_count(), 1);
    assert_eq!(sink.connected(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_session_alive_through_reap() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));
    recv.handle_sap(&announce("bob 2 2 IN IP4 10.0.0.2", 0), secs(1));

    // Only alice keeps announcing.
    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(15));
    recv.reap(secs(22));

    assert_eq!(recv.session_count(), 1);
    assert_eq!(sink.disconnected(), 1);
}

#[tokio::test]
async fn test_goodbye_destroys_session() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("bob 2 2 IN IP4 10.0.0.2", 0), secs(1));
    recv.handle_sap(&announce("bob 2 2 IN IP4 10.0.0.2", 0), secs(2));
    recv.handle_sap(&goodbye("bob 2 2 IN IP4 10.0.0.2", 0), secs(3));

    assert_eq!(recv.session_count(), 0);
    assert_eq!(sink.connected(), 1);
    assert_eq!(sink.disconnected(), 1);
}

#[tokio::test]
async fn test_goodbye_for_unknown_origin_is_noop() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&goodbye("stranger 9 9 IN IP4 10.0.0.9", 0), secs(1));

    assert_eq!(recv.session_count(), 0);
    assert_eq!(sink.connected(), 0);
}

#[tokio::test]
async fn test_session_cap_refuses_seventeenth() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    for i in 0..17 {
        let origin = format!("sender{i} {i} 1 IN IP4 10.0.0.{i}");
        recv.handle_sap(&announce(&origin, 0), secs(1));
    }

    assert_eq!(recv.session_count(), 16);
    assert_eq!(sink.connected(), 16);

    // The refused origin can still join once a slot frees up.
    recv.handle_sap(&goodbye("sender0 0 1 IN IP4 10.0.0.0", 0), secs(2));
    recv.handle_sap(&announce("sender16 16 1 IN IP4 10.0.0.16", 0), secs(2));
    assert_eq!(recv.session_count(), 16);
}

#[tokio::test]
async fn test_liveness_timeout_reaps_silent_sessions() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));
    recv.handle_sap(&announce("bob 2 2 IN IP4 10.0.0.2", 0), secs(1));
    assert_eq!(recv.session_count(), 2);

    // 20 s of silence has not yet elapsed at t=21 for activity at t=1.
    recv.reap(secs(21));
    assert_eq!(recv.session_count(), 2);

    recv.reap(secs(22));
    assert_eq!(recv.session_count(), 0);
    assert_eq!(sink.disconnected(), 2);
}

#[tokio::test]
async fn test_malformed_datagrams_are_dropped() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    // Truncated SAP header.
    recv.handle_sap(&[0x20, 0x00], secs(1));
    // Valid SAP framing around garbage SDP.
    recv.handle_sap(&sap_datagram("this is not sdp", false), secs(1));

    assert_eq!(recv.session_count(), 0);
    assert_eq!(sink.connected(), 0);
}

#[tokio::test]
async fn test_refused_sink_discards_announcement() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    sink.refuse.store(true, std::sync::atomic::Ordering::Relaxed);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));
    assert_eq!(recv.session_count(), 0);

    // The same origin can join later once the sink accepts again.
    sink.refuse.store(false, std::sync::atomic::Ordering::Relaxed);
    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(2));
    assert_eq!(recv.session_count(), 1);
}

#[tokio::test]
async fn test_prefill_matches_intended_minus_sink_latency() {
    // ---
    let sink = MockSink::new(SINK_LATENCY);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));

    // Intended latency 500 ms minus 100 ms of sink latency leaves a
    // 400 ms silence pre-seed in the queue.
    let input = sink.last_input().expect("input");
    assert_eq!(input.source_latency(), Some(400_000));
}

#[tokio::test]
async fn test_large_sink_latency_clamps_intended() {
    // ---
    // A sink latency of 400 ms forces intended latency to 800 ms, so
    // the pre-seed is the 400 ms difference.
    let sink = MockSink::new(400_000);
    let mut recv = receiver(Arc::clone(&sink));

    recv.handle_sap(&announce("alice 1 1 IN IP4 10.0.0.1", 0), secs(1));

    let input = sink.last_input().expect("input");
    assert_eq!(input.source_latency(), Some(400_000));
}
