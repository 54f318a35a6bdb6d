//! Module arguments and receiver constants.
//!
//! Arguments arrive as `key=value` pairs (`sink=`, `sap_address=`), the
//! form the module has always been loaded with. Anything else is a
//! configuration error and fails startup.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Error, Result};

/// UDP port SAP announcements are multicast on.
pub const SAP_PORT: u16 = 9875;

/// Default SAP multicast group.
pub const DEFAULT_SAP_ADDRESS: &str = "224.0.0.56";

/// Hard cap on a session's jitter queue, in bytes.
pub const QUEUE_MAX_LENGTH: usize = 1024 * 1024 * 40;

/// Maximum number of concurrent sessions.
pub const MAX_SESSIONS: usize = 16;

/// A session with no SAP or RTP activity for this long is destroyed.
pub const DEATH_TIMEOUT: Duration = Duration::from_secs(20);

/// Minimum interval between resampling-rate retunes.
pub const RATE_UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// Target queue fill, before clamping against the sink latency.
pub const LATENCY_USEC: u64 = 500_000;

const VALID_KEYS: &[&str] = &["sink", "sap_address"];

/// Parsed module arguments.
#[derive(Debug, Clone)]
pub struct ModuleArgs {
    // ---
    /// Name of the host sink to attach playback to.
    pub sink: String,

    /// SAP socket address (group + port 9875).
    pub sap_address: SocketAddr,
}

impl ModuleArgs {
    // ---
    /// Parses `key=value` argument pairs.
    ///
    /// `sink` is required; `sap_address` defaults to `224.0.0.56` and
    /// accepts IPv6 literals.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an unknown or duplicate key, a pair
    /// without `=`, a missing `sink`, or an unparsable address.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        // ---
        let mut sink: Option<String> = None;
        let mut sap_address: Option<String> = None;

        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("expected key=value, got '{arg}'")))?;

            if !VALID_KEYS.contains(&key) {
                return Err(Error::Config(format!("unknown key '{key}'")));
            }

            let slot = match key {
                "sink" => &mut sink,
                _ => &mut sap_address,
            };
            if slot.replace(value.to_string()).is_some() {
                return Err(Error::Config(format!("duplicate key '{key}'")));
            }
        }

        let sink = sink.ok_or_else(|| Error::Config("missing required key 'sink'".into()))?;
        if sink.is_empty() {
            return Err(Error::Config("'sink' must not be empty".into()));
        }

        let sap_address = sap_address.as_deref().unwrap_or(DEFAULT_SAP_ADDRESS);
        let ip: IpAddr = sap_address
            .parse()
            .map_err(|_| Error::Config(format!("invalid SAP address '{sap_address}'")))?;

        Ok(Self {
            sink,
            sap_address: SocketAddr::new(ip, SAP_PORT),
        })
    }
}
