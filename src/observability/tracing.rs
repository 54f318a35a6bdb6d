//! Tracing initialization.
//!
//! One place configures the subscriber so embedders and the binary
//! behave the same.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG` via `EnvFilter`, defaulting to `info`.
pub fn init_tracing() -> Result<()> {
    // ---
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(env_filter).init();

    Ok(())
}
