//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` per process. Hot-path instrumentation is plain
//! counter increments; the scrape endpoint is opt-in and explicit. The
//! endpoint binds eagerly and hands each connection to its own task, so
//! callers learn the real address (and bind failures) up front and a
//! stuck scraper cannot stall the next one.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Content type of the Prometheus text exposition format.
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

/// Prometheus registry + handles for the receiver's series.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Session lifecycle
    pub sessions_active: IntGauge,
    pub sessions_created_total: IntCounter,
    pub sessions_expired_total: IntCounter,
    pub sessions_refused_total: IntCounter,

    // SAP traffic
    pub sap_announcements_total: IntCounter,
    pub sap_goodbyes_total: IntCounter,

    // RTP ingest
    pub rtp_packets_total: IntCounter,
    pub rtp_bytes_total: IntCounter,
    pub rtp_packets_dropped_total: IntCounter,

    // Drift control
    pub queue_overruns_total: IntCounter,
    pub rate_updates_total: IntCounter,
    pub rate_updates_skipped_total: IntCounter,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the receiver's metrics.
    pub fn new() -> Result<Self> {
        // ---
        let registry = Registry::new_custom(Some("rtp_recv".into()), None)?;

        let sessions_active = IntGauge::with_opts(Opts::new(
            "sessions_active",
            "Sessions currently in the registry",
        ))?;
        let sessions_created_total = IntCounter::with_opts(Opts::new(
            "sessions_created_total",
            "Sessions created from SAP announcements",
        ))?;
        let sessions_expired_total = IntCounter::with_opts(Opts::new(
            "sessions_expired_total",
            "Sessions destroyed by the liveness timeout",
        ))?;
        let sessions_refused_total = IntCounter::with_opts(Opts::new(
            "sessions_refused_total",
            "Announcements refused because the session cap was reached",
        ))?;

        let sap_announcements_total = IntCounter::with_opts(Opts::new(
            "sap_announcements_total",
            "SAP announcements decoded",
        ))?;
        let sap_goodbyes_total =
            IntCounter::with_opts(Opts::new("sap_goodbyes_total", "SAP goodbyes decoded"))?;

        let rtp_packets_total =
            IntCounter::with_opts(Opts::new("rtp_packets_total", "RTP packets accepted"))?;
        let rtp_bytes_total = IntCounter::with_opts(Opts::new(
            "rtp_bytes_total",
            "RTP payload bytes queued for playback",
        ))?;
        let rtp_packets_dropped_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_dropped_total",
            "RTP packets dropped (payload type or SSRC mismatch)",
        ))?;

        let queue_overruns_total = IntCounter::with_opts(Opts::new(
            "queue_overruns_total",
            "Jitter queue overruns",
        ))?;
        let rate_updates_total = IntCounter::with_opts(Opts::new(
            "rate_updates_total",
            "Resampler input-rate retunes applied",
        ))?;
        let rate_updates_skipped_total = IntCounter::with_opts(Opts::new(
            "rate_updates_skipped_total",
            "Retunes skipped because the computed fix was implausible",
        ))?;

        for metric in [
            &sessions_created_total,
            &sessions_expired_total,
            &sessions_refused_total,
            &sap_announcements_total,
            &sap_goodbyes_total,
            &rtp_packets_total,
            &rtp_bytes_total,
            &rtp_packets_dropped_total,
            &queue_overruns_total,
            &rate_updates_total,
            &rate_updates_skipped_total,
        ] {
            registry.register(Box::new(metric.clone()))?;
        }
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            registry,
            sessions_active,
            sessions_created_total,
            sessions_expired_total,
            sessions_refused_total,
            sap_announcements_total,
            sap_goodbyes_total,
            rtp_packets_total,
            rtp_bytes_total,
            rtp_packets_dropped_total,
            queue_overruns_total,
            rate_updates_total,
            rate_updates_skipped_total,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Starts the scrape endpoint and returns the address it bound to.
    ///
    /// Serves `GET /metrics`; every other request gets a 404. The
    /// accept loop runs detached for the rest of the process.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot be bound.
    pub async fn serve_metrics(&self, cfg: MetricsServerConfig) -> Result<SocketAddr> {
        // ---
        let listener = TcpListener::bind(cfg.bind).await?;
        let addr = listener.local_addr()?;
        let registry = self.registry.clone();

        tokio::spawn(async move {
            // ---
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("metrics listener failed: {e}");
                        return;
                    }
                };

                let registry = registry.clone();
                tokio::spawn(async move {
                    // ---
                    let served = Http::new()
                        .serve_connection(
                            stream,
                            service_fn(move |req: Request<Body>| {
                                let response = scrape_response(
                                    &registry,
                                    req.method(),
                                    req.uri().path(),
                                );
                                async move { Ok::<_, Infallible>(response) }
                            }),
                        )
                        .await;
                    if let Err(e) = served {
                        debug!("metrics scrape from {peer} failed: {e}");
                    }
                });
            }
        });

        Ok(addr)
    }
}

/// Builds the response for one scrape request.
fn scrape_response(registry: &Registry, method: &Method, path: &str) -> Response<Body> {
    // ---
    if method != Method::GET || path != "/metrics" {
        return page(StatusCode::NOT_FOUND, Body::from("not found"), None);
    }

    let mut body = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut body) {
        Ok(()) => page(StatusCode::OK, Body::from(body), Some(PROMETHEUS_TEXT)),
        Err(e) => page(
            StatusCode::INTERNAL_SERVER_ERROR,
            Body::from(format!("encode error: {e}")),
            None,
        ),
    }
}

fn page(status: StatusCode, body: Body, content_type: Option<&'static str>) -> Response<Body> {
    // ---
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Some(value) = content_type {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(value));
    }
    response
}
