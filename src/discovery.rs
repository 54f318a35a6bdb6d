//! SAP discovery loop and liveness reaper.
//!
//! `RtpRecv` is the receiving module itself: it watches the SAP group
//! for announcements, creates a session per new origin, refreshes the
//! activity clock on repeats, tears sessions down on goodbyes, and
//! every `DEATH_TIMEOUT` reaps sessions whose senders went silent.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::clock;
use crate::config::DEATH_TIMEOUT;
use crate::error::Result;
use crate::net;
use crate::observability::MetricsContext;
use crate::playback::{Control, Sink};
use crate::registry::SessionRegistry;
use crate::sap::SapPacket;
use crate::sdp::SdpInfo;
use crate::session::Session;

/// The SAP/RTP receiving module.
pub struct RtpRecv {
    // ---
    sap_socket: UdpSocket,
    sink: Arc<dyn Sink>,
    registry: SessionRegistry,

    /// Process cookie compared against incoming SSRCs to spot loops.
    cookie: u32,

    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    metrics: MetricsContext,
}

impl RtpRecv {
    // ---
    /// Binds the SAP socket and prepares an empty registry. Must be
    /// called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::Socket` when the SAP group cannot be joined;
    /// this is fatal at module init.
    pub fn bind(
        sap_address: SocketAddr,
        sink: Arc<dyn Sink>,
        metrics: MetricsContext,
    ) -> Result<Self> {
        // ---
        let sap_socket = net::multicast_socket(&sap_address)?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(Self {
            sap_socket,
            sink,
            registry: SessionRegistry::new(),
            cookie: rand::random(),
            control_tx,
            control_rx,
            metrics,
        })
    }

    /// Address the SAP socket actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        // ---
        Ok(self.sap_socket.local_addr()?)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        // ---
        self.registry.len()
    }

    /// Runs discovery until the task is cancelled.
    ///
    /// Single loop over SAP datagrams, the reaper tick and host-side
    /// kill requests; sessions are only ever created and destroyed
    /// here.
    pub async fn run(mut self) -> Result<()> {
        // ---
        let mut buf = vec![0u8; 65_536];
        let start = tokio::time::Instant::now() + DEATH_TIMEOUT;
        let mut reaper = tokio::time::interval_at(start, DEATH_TIMEOUT);

        loop {
            tokio::select! {
                received = self.sap_socket.recv(&mut buf) => match received {
                    Ok(len) => {
                        let datagram = buf[..len].to_vec();
                        self.handle_sap(&datagram, clock::now());
                    }
                    Err(e) => warn!("SAP socket read failed: {e}"),
                },
                _ = reaper.tick() => self.reap(clock::now()),
                Some(msg) = self.control_rx.recv() => self.handle_control(msg),
            }
        }
    }

    /// Processes one SAP datagram.
    ///
    /// Malformed SAP or SDP is dropped where it is detected; a goodbye
    /// for an unknown origin is a no-op.
    pub fn handle_sap(&mut self, datagram: &[u8], now: Duration) {
        // ---
        let sap = match SapPacket::parse(datagram) {
            Ok(sap) => sap,
            Err(e) => {
                trace!("dropping SAP datagram: {e}");
                return;
            }
        };

        let info = match SdpInfo::parse(&sap.sdp) {
            Ok(info) => info,
            Err(e) => {
                trace!("dropping announcement with bad SDP: {e}");
                return;
            }
        };

        if sap.goodbye {
            self.metrics.sap_goodbyes_total.inc();
            if self.registry.remove(&info.origin).is_some() {
                debug!("goodbye from '{}'", info.origin);
            }
        } else {
            self.metrics.sap_announcements_total.inc();
            if let Some(session) = self.registry.get(&info.origin) {
                // Refresh only; announced parameters are frozen until
                // the origin says goodbye or times out.
                session.refresh(now.as_secs() as u32);
            } else {
                self.create_session(info, now);
            }
        }

        self.metrics.sessions_active.set(self.registry.len() as i64);
    }

    fn create_session(&mut self, info: SdpInfo, now: Duration) {
        // ---
        if self.registry.is_full() {
            warn!(
                "session limit reached, ignoring announcement from '{}'",
                info.origin
            );
            self.metrics.sessions_refused_total.inc();
            return;
        }

        match Session::spawn(
            info,
            self.sink.as_ref(),
            self.cookie,
            self.control_tx.clone(),
            self.metrics.clone(),
            now,
        ) {
            Ok(session) => {
                self.metrics.sessions_created_total.inc();
                if let Err(e) = self.registry.insert(session) {
                    warn!("{e}");
                }
            }
            Err(e) => warn!("failed to create session: {e}"),
        }
    }

    /// Destroys every session whose last activity is older than the
    /// death timeout.
    pub fn reap(&mut self, now: Duration) {
        // ---
        debug!("checking for dead streams");

        let now_secs = now.as_secs() as u32;
        let timeout = DEATH_TIMEOUT.as_secs() as u32;

        let dead: Vec<String> = self
            .registry
            .iter()
            .filter(|s| s.last_activity_secs() + timeout < now_secs)
            .map(|s| s.origin().to_string())
            .collect();

        for origin in dead {
            debug!("session '{origin}' timed out");
            self.metrics.sessions_expired_total.inc();
            self.registry.remove(&origin);
        }

        self.metrics.sessions_active.set(self.registry.len() as i64);
    }

    fn handle_control(&mut self, msg: Control) {
        // ---
        match msg {
            Control::Kill { origin } => {
                debug!("sink requested teardown of '{origin}'");
                self.registry.remove(&origin);
                self.metrics.sessions_active.set(self.registry.len() as i64);
            }
        }
    }
}

impl Drop for RtpRecv {
    // ---
    fn drop(&mut self) {
        // ---
        self.registry.clear();
    }
}
