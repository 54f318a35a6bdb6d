//! RTP multicast receiver library.
//!
//! Discovers audio sessions announced via SAP/SDP on a multicast group,
//! joins each announced RTP stream, reassembles its payload through a
//! jitter queue and keeps playback locked to a target latency by
//! retuning a per-stream resampler against the sender's clock.
//!
//! This crate is the **public gateway**: embedders import through these
//! re-exports and bring their own [`Sink`] implementation, or use the
//! bundled cpal-backed [`CpalSink`].

pub mod audio;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod net;
pub mod observability;
pub mod playback;
pub mod queue;
pub mod registry;
pub mod resampler;
pub mod rtp;
pub mod sample;
pub mod sap;
pub mod sdp;
pub mod session;
pub mod smoother;

pub use audio::CpalSink;
pub use config::ModuleArgs;
pub use discovery::RtpRecv;
pub use error::{Error, Result};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use playback::{Playback, Sink, SinkInput};
pub use queue::JitterQueue;
pub use rtp::RtpPacket;
pub use sample::{SampleFormat, SampleSpec};
pub use sap::SapPacket;
pub use sdp::SdpInfo;
pub use session::Session;
pub use smoother::Smoother;
