//! Receiver error kinds.
//!
//! One enum covers the failure classes the receiver distinguishes. Only
//! configuration and socket errors are ever fatal; everything on the
//! packet path is dropped where it occurs and operation continues.

use std::io;
use thiserror::Error;

/// Errors surfaced by the receiver library.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad module arguments or an invalid SAP address. Fatal at init.
    #[error("invalid module arguments: {0}")]
    Config(String),

    /// Syscall failure during socket setup.
    #[error("socket setup failed: {0}")]
    Socket(#[from] io::Error),

    /// The session cap would be exceeded.
    #[error("session limit reached ({0} active)")]
    Capacity(usize),

    /// Malformed RTP/SAP/SDP data. Dropped silently by packet-path callers.
    #[error("malformed packet: {0}")]
    Decode(&'static str),

    /// The host sink refused a stream connection.
    #[error("sink unavailable: {0}")]
    Sink(String),

    /// A jitter queue push would exceed its capacity.
    #[error("jitter queue overrun")]
    Overrun,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
