//! End-to-end pipeline tests over loopback sockets.
//!
//! Runs the whole module (SAP socket, discovery loop, per-session RTP
//! receive task, playback adapter) against a mock sink, with a test
//! sender pushing real datagrams through the loopback interface.


use std::sync::Arc;
use std::time::Duration;

use mock_sink::{rtp_datagram, sap_datagram, sdp_body, MockSink, MockSinkInput};
use rtp_recv::{MetricsContext, RtpRecv};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

const PAYLOAD_TYPE: u8 = 127;
const SSRC: u32 = 0x5005_5005;
const FRAMES_PER_PACKET: u32 = 288;
const PACKET_BYTES: usize = 1152;

/// Grabs a currently free loopback UDP port.
fn free_port() -> u16 {
    // ---
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").expect("probe bind");
    probe.local_addr().expect("probe addr").port()
}

/// Starts the module on an ephemeral SAP port and returns the sender
/// side plus the running task.
async fn start_module(
    sink: Arc<MockSink>,
) -> (UdpSocket, std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    // ---
    let recv = RtpRecv::bind(
        "127.0.0.1:0".parse().expect("addr"),
        sink,
        MetricsContext::new().expect("metrics"),
    )
    .expect("bind failed");
    let sap_addr = recv.local_addr().expect("local addr");

    let task = tokio::spawn(async move {
        let _ = recv.run().await;
    });

    let tx = UdpSocket::bind("127.0.0.1:0").await.expect("tx bind");
    (tx, sap_addr, task)
}

/// Polls until `predicate` holds or two seconds pass.
async fn wait_for<F: Fn() -> bool>(predicate: F) -> bool {
    // ---
    timeout(Duration::from_secs(2), async {
        while !predicate() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

async fn announce_stream(
    tx: &UdpSocket,
    sap_addr: std::net::SocketAddr,
    sink: &MockSink,
    origin: &str,
    rtp_port: u16,
) -> Arc<MockSinkInput> {
    // ---
    let sdp = sdp_body(origin, "pipeline", "127.0.0.1", rtp_port, PAYLOAD_TYPE);
    tx.send_to(&sap_datagram(&sdp, false), sap_addr)
        .await
        .expect("send SAP");

    assert!(wait_for(|| sink.connected() > 0).await, "session not created");
    sink.last_input().expect("input")
}

#[tokio::test]
async fn test_happy_path_plays_announced_stream() {
    // ---
    let sink = MockSink::new(100_000);
    let (tx, sap_addr, task) = start_module(Arc::clone(&sink)).await;

    let rtp_port = free_port();
    let input = announce_stream(&tx, sap_addr, &sink, "alice 1 1 IN IP4 239.1.1.1", rtp_port).await;

    // 100 packets of 1152 bytes, timestamps 0, 288, 576, ...
    let rtp_dest = format!("127.0.0.1:{rtp_port}");
    for i in 0u32..100 {
        let payload = vec![0xab; PACKET_BYTES];
        let datagram = rtp_datagram(
            PAYLOAD_TYPE,
            i as u16,
            i * FRAMES_PER_PACKET,
            SSRC,
            &payload,
        );
        tx.send_to(&datagram, &rtp_dest).await.expect("send RTP");
    }

    // 100 packets on top of the 400 ms pre-seed: queue fill passes
    // one second of audio.
    assert!(
        wait_for(|| input.source_latency().unwrap_or(0) > 1_000_000).await,
        "RTP payload never reached the queue"
    );

    // Drain the silence pre-seed, then the payload must surface intact.
    let prefill = input.spec.usec_to_bytes(400_000);
    let mut drained = input.drain(prefill).expect("drain prefill");
    while drained.len() < prefill {
        let missing = prefill - drained.len();
        drained.extend(input.drain(missing).expect("drain prefill rest"));
    }
    assert!(drained.iter().all(|&b| b == 0));

    let audio = input.drain(PACKET_BYTES).expect("drain payload");
    assert!(audio.iter().all(|&b| b == 0xab));

    // No retune happens before the five-second gate.
    assert!(input.rates.lock().expect("lock").is_empty());

    task.abort();
}

#[tokio::test]
async fn test_foreign_ssrc_and_payload_are_filtered() {
    // ---
    let sink = MockSink::new(100_000);
    let (tx, sap_addr, task) = start_module(Arc::clone(&sink)).await;

    let rtp_port = free_port();
    let input = announce_stream(&tx, sap_addr, &sink, "bob 2 2 IN IP4 239.1.1.2", rtp_port).await;
    let rtp_dest = format!("127.0.0.1:{rtp_port}");

    // Latch the SSRC with one accepted packet.
    tx.send_to(
        &rtp_datagram(PAYLOAD_TYPE, 0, 0, SSRC, &[0x11; PACKET_BYTES]),
        &rtp_dest,
    )
    .await
    .expect("send RTP");
    let base = input.spec.usec_to_bytes(400_000) + PACKET_BYTES;
    assert!(
        wait_for(|| input.source_latency().unwrap_or(0) == input.spec.bytes_to_usec(base as i64))
            .await
    );

    // A wrong payload type and a wrong SSRC must both be ignored.
    tx.send_to(
        &rtp_datagram(96, 1, 288, SSRC, &[0x22; PACKET_BYTES]),
        &rtp_dest,
    )
    .await
    .expect("send RTP");
    tx.send_to(
        &rtp_datagram(PAYLOAD_TYPE, 1, 288, SSRC ^ 1, &[0x33; PACKET_BYTES]),
        &rtp_dest,
    )
    .await
    .expect("send RTP");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        input.source_latency().unwrap_or(0),
        input.spec.bytes_to_usec(base as i64)
    );

    task.abort();
}

#[tokio::test]
async fn test_timestamp_wrap_is_a_small_step() {
    // ---
    let sink = MockSink::new(100_000);
    let (tx, sap_addr, task) = start_module(Arc::clone(&sink)).await;

    let rtp_port = free_port();
    let input = announce_stream(&tx, sap_addr, &sink, "carol 3 3 IN IP4 239.1.1.3", rtp_port).await;
    let rtp_dest = format!("127.0.0.1:{rtp_port}");

    // First packet puts the expected timestamp at 0xFFFFFF00; the next
    // one has wrapped to 0x100, i.e. 512 frames (2048 bytes) ahead.
    tx.send_to(
        &rtp_datagram(
            PAYLOAD_TYPE,
            0,
            0xffff_ff00u32.wrapping_sub(FRAMES_PER_PACKET),
            SSRC,
            &[0x44; PACKET_BYTES],
        ),
        &rtp_dest,
    )
    .await
    .expect("send RTP");
    tx.send_to(
        &rtp_datagram(PAYLOAD_TYPE, 1, 0x0000_0100, SSRC, &[0x55; PACKET_BYTES]),
        &rtp_dest,
    )
    .await
    .expect("send RTP");

    // Pre-seed + packet + 512-frame silence gap + packet.
    let expected = input.spec.usec_to_bytes(400_000) + PACKET_BYTES + 2048 + PACKET_BYTES;
    assert!(
        wait_for(|| {
            input.source_latency().unwrap_or(0) == input.spec.bytes_to_usec(expected as i64)
        })
        .await,
        "wrap was not treated as a 512-frame step"
    );

    task.abort();
}

#[tokio::test]
async fn test_sink_kill_destroys_session() {
    // ---
    let sink = MockSink::new(100_000);
    let (tx, sap_addr, task) = start_module(Arc::clone(&sink)).await;

    let input =
        announce_stream(&tx, sap_addr, &sink, "dave 4 4 IN IP4 239.1.1.4", free_port()).await;

    input.kill_source();
    assert!(
        wait_for(|| sink.disconnected() == 1).await,
        "kill did not reach the main context"
    );

    task.abort();
}

#[tokio::test]
async fn test_goodbye_over_the_wire() {
    // ---
    let sink = MockSink::new(100_000);
    let (tx, sap_addr, task) = start_module(Arc::clone(&sink)).await;

    let origin = "erin 5 5 IN IP4 239.1.1.5";
    announce_stream(&tx, sap_addr, &sink, origin, free_port()).await;

    let sdp = sdp_body(origin, "pipeline", "127.0.0.1", 0, PAYLOAD_TYPE);
    tx.send_to(&sap_datagram(&sdp, true), sap_addr)
        .await
        .expect("send goodbye");

    assert!(
        wait_for(|| sink.disconnected() == 1).await,
        "goodbye did not destroy the session"
    );

    task.abort();
}
