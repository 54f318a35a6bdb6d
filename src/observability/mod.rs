//! Logging and metrics plumbing.

mod metrics;
mod tracing;

pub use metrics::{MetricsContext, MetricsServerConfig};
pub use tracing::init_tracing;
