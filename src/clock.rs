//! Process-wide monotonic clock.
//!
//! All timing in the receiver (smoother samples, rate-retune gating,
//! liveness bookkeeping) is expressed as a `Duration` since a single
//! process-wide anchor, so values from different tasks are comparable.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Returns the monotonic time elapsed since the process anchor.
///
/// The anchor is latched on first call.
pub fn now() -> Duration {
    // ---
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// Coarse seconds since the process anchor.
///
/// This is the granularity stored in each session's activity field; a
/// `u32` holds over a century of uptime.
pub fn now_secs() -> u32 {
    // ---
    now().as_secs() as u32
}
