//! Per-stream sessions.
//!
//! A session owns everything one announced stream needs: the RTP
//! multicast socket, the jitter queue, the smoother tracking the
//! sender's clock, and the sink input playing the queue. Ingest runs on
//! a spawned receive task (the I/O context); creation and destruction
//! happen on the discovery side (the main context). The only state
//! shared between the two is the activity clock, an atomic of coarse
//! monotonic seconds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::clock;
use crate::config::{LATENCY_USEC, QUEUE_MAX_LENGTH, RATE_UPDATE_INTERVAL};
use crate::error::Result;
use crate::net;
use crate::observability::MetricsContext;
use crate::playback::{Control, Playback, Sink, SinkInput};
use crate::queue::JitterQueue;
use crate::rtp::RtpPacket;
use crate::sample::SampleSpec;
use crate::sdp::SdpInfo;
use crate::smoother::Smoother;

/// Signed distance from `expected` to `packet` on the 32-bit timestamp
/// ring, choosing the interpretation nearer to zero so a wrap between
/// consecutive packets reads as a small step instead of a 4-billion
/// frame jump.
fn timestamp_delta(packet: u32, expected: u32) -> i64 {
    // ---
    i64::from(packet.wrapping_sub(expected) as i32)
}

/// One live session as held by the registry (main context).
pub struct Session {
    // ---
    origin: String,
    media_name: String,
    last_activity: Arc<AtomicU32>,
    input: Arc<dyn SinkInput>,
    rx_task: JoinHandle<()>,
}

impl Session {
    // ---
    /// Creates a session for an announced stream and starts its receive
    /// task. Must be called inside a tokio runtime.
    ///
    /// Every resource acquired here is released again if a later step
    /// fails (sockets close on drop, the sink input is disconnected).
    ///
    /// # Errors
    ///
    /// Returns `Error::Socket` when the RTP group cannot be joined and
    /// `Error::Sink` when the host sink refuses the stream.
    pub fn spawn(
        info: SdpInfo,
        sink: &dyn Sink,
        cookie: u32,
        control: mpsc::UnboundedSender<Control>,
        metrics: MetricsContext,
        now: Duration,
    ) -> Result<Self> {
        // ---
        let media_name = match &info.session_name {
            Some(name) => format!("RTP Stream ({name})"),
            None => "RTP Stream".to_string(),
        };

        let socket = net::multicast_socket(&info.addr)?;
        let input = sink.connect(&info.sample_spec, &media_name)?;

        let mut intended_latency_us = LATENCY_USEC;
        let sink_latency_us = input.set_requested_latency(intended_latency_us / 2);
        if intended_latency_us < sink_latency_us * 2 {
            intended_latency_us = sink_latency_us * 2;
        }

        let spec = info.sample_spec;
        let prefill = spec.usec_to_bytes(intended_latency_us - sink_latency_us);
        let queue = Arc::new(Mutex::new(JitterQueue::new(
            QUEUE_MAX_LENGTH,
            spec.frame_size(),
            spec.format.silence_byte(),
            prefill,
        )));

        let playback = Arc::new(Playback::new(
            info.origin.clone(),
            spec,
            Arc::clone(&queue),
            control,
        ));
        input.start(Arc::clone(&playback));

        let last_activity = Arc::new(AtomicU32::new(now.as_secs() as u32));
        let ingest = Ingest {
            origin: info.origin.clone(),
            payload_type: info.payload_type,
            spec,
            frame_size: spec.frame_size(),
            cookie,
            queue,
            smoother: Smoother::default(),
            input: Arc::clone(&input),
            last_activity: Arc::clone(&last_activity),
            metrics,
            first_packet: false,
            ssrc: 0,
            expected_timestamp: 0,
            rate: spec.rate,
            intended_latency_us,
            last_rate_update_us: now.as_micros() as u64,
        };

        let rx_task = tokio::spawn(rx_loop(socket, ingest));

        info!("new session '{media_name}' from {}", info.addr);
        Ok(Self {
            origin: info.origin,
            media_name,
            last_activity,
            input,
            rx_task,
        })
    }

    /// The session's identity key.
    pub fn origin(&self) -> &str {
        // ---
        &self.origin
    }

    /// Marks SAP activity; called on every refresh announcement.
    pub fn refresh(&self, now_secs: u32) {
        // ---
        self.last_activity.store(now_secs, Ordering::Relaxed);
    }

    /// Seconds value of the most recent SAP or RTP activity.
    pub fn last_activity_secs(&self) -> u32 {
        // ---
        self.last_activity.load(Ordering::Relaxed)
    }
}

impl Drop for Session {
    // ---
    fn drop(&mut self) {
        // ---
        info!("freeing session '{}'", self.media_name);
        self.input.disconnect();
        self.rx_task.abort();
    }
}

/// Reads the session's RTP socket until the session is destroyed.
async fn rx_loop(socket: UdpSocket, mut ingest: Ingest) {
    // ---
    let mut buf = vec![0u8; 8192];
    loop {
        match socket.recv(&mut buf).await {
            Ok(len) => match RtpPacket::parse(&buf[..len]) {
                Ok(pkt) => ingest.handle_packet(&pkt, clock::now()),
                Err(e) => trace!("dropping datagram on '{}': {e}", ingest.origin),
            },
            Err(e) => {
                warn!("RTP socket failed on '{}': {e}", ingest.origin);
                return;
            }
        }
    }
}

/// Ingest-side state, owned by the receive task.
struct Ingest {
    // ---
    origin: String,
    payload_type: u8,
    spec: SampleSpec,
    frame_size: usize,
    cookie: u32,
    queue: Arc<Mutex<JitterQueue>>,
    smoother: Smoother,
    input: Arc<dyn SinkInput>,
    last_activity: Arc<AtomicU32>,
    metrics: MetricsContext,

    first_packet: bool,
    ssrc: u32,
    expected_timestamp: u32,

    /// Current resampler input rate; starts at the declared rate.
    rate: u32,
    intended_latency_us: u64,
    last_rate_update_us: u64,
}

impl Ingest {
    // ---
    /// Processes one decoded RTP packet.
    fn handle_packet(&mut self, pkt: &RtpPacket, now: Duration) {
        // ---
        if pkt.payload_type != self.payload_type {
            trace!(
                "dropping payload type {} on '{}' (expected {})",
                pkt.payload_type,
                self.origin,
                self.payload_type
            );
            self.metrics.rtp_packets_dropped_total.inc();
            return;
        }

        if !self.first_packet {
            self.first_packet = true;
            self.ssrc = pkt.ssrc;
            self.expected_timestamp = pkt.timestamp;

            if self.ssrc == self.cookie {
                warn!("detected RTP packet loop on '{}'", self.origin);
            }
        } else if pkt.ssrc != self.ssrc {
            trace!("dropping foreign SSRC {:#x} on '{}'", pkt.ssrc, self.origin);
            self.metrics.rtp_packets_dropped_total.inc();
            return;
        }

        let delta = timestamp_delta(pkt.timestamp, self.expected_timestamp);
        let now_us = now.as_micros() as u64;

        let write_us = {
            let mut queue = self.lock_queue();
            queue.seek(delta * self.frame_size as i64, true);
            self.spec.bytes_to_usec(queue.write_index())
        };
        self.smoother.put(now_us, write_us);
        {
            let mut queue = self.lock_queue();
            if queue.push(&pkt.payload).is_err() {
                warn!("queue overrun on '{}'", self.origin);
                self.metrics.queue_overruns_total.inc();
                queue.seek(pkt.payload.len() as i64, true);
            }
        }

        self.expected_timestamp = pkt
            .timestamp
            .wrapping_add((pkt.payload.len() / self.frame_size) as u32);
        self.last_activity
            .store(now.as_secs() as u32, Ordering::Relaxed);
        self.metrics.rtp_packets_total.inc();
        self.metrics.rtp_bytes_total.inc_by(pkt.payload.len() as u64);

        self.maybe_update_rate(now_us);

        if self.lock_queue().is_readable() && self.input.underruns() > 0 {
            debug!("requesting rewind after underrun on '{}'", self.origin);
            self.input.request_rewind(0, true);
        }
    }

    /// Periodic drift compensation: compare the believed write position
    /// against the playback frontier and retune the resampler's input
    /// rate toward the intended latency.
    fn maybe_update_rate(&mut self, now_us: u64) {
        // ---
        let interval_us = RATE_UPDATE_INTERVAL.as_micros() as u64;
        if self.last_rate_update_us + interval_us > now_us {
            return;
        }

        debug!("updating sample rate on '{}'", self.origin);

        let wi = self.smoother.estimate(now_us);
        let ri = {
            let queue = self.lock_queue();
            self.spec.bytes_to_usec(queue.read_index())
        };

        let sink_delay = self.input.latency();
        let render_delay = self.input.render_delay();
        let ri = ri.saturating_sub(render_delay + sink_delay);

        let latency = wi.saturating_sub(ri);

        debug!(
            "write index deviates by {:.2} ms, expected {:.2} ms",
            latency as f64 / 1000.0,
            self.intended_latency_us as f64 / 1000.0
        );

        let deviation = self.intended_latency_us.abs_diff(latency);
        let fix_samples = deviation * u64::from(self.rate) / interval_us;

        if fix_samples as f64 > f64::from(self.rate) * 0.20 {
            debug!("rate fix is too large ({fix_samples} Hz), not applying");
            self.metrics.rate_updates_skipped_total.inc();
            // The retune timestamp is deliberately left alone so the
            // next packet re-measures instead of waiting out the
            // interval on a bad estimate.
            return;
        }

        if latency < self.intended_latency_us {
            self.rate -= fix_samples as u32;
        } else {
            self.rate += fix_samples as u32;
        }

        self.input.set_input_rate(self.rate);
        debug!("updated sampling rate on '{}' to {} Hz", self.origin, self.rate);
        self.metrics.rate_updates_total.inc();
        self.last_rate_update_us = now_us;
    }

    fn lock_queue(&self) -> MutexGuard<'_, JitterQueue> {
        // ---
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
