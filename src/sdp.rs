//! SDP session description parsing.
//!
//! Reduces an announced SDP body to the handful of facts a session needs:
//! the origin key, a display name, the RTP group address and port, the
//! payload type and its sample spec. The full `o=` value is the identity
//! key; two announcements with the same origin are the same session.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};
use crate::sample::{SampleFormat, SampleSpec};

/// The facts extracted from one SDP body.
#[derive(Debug, Clone)]
pub struct SdpInfo {
    // ---
    /// The entire `o=` value; the session's identity key.
    pub origin: String,

    /// `s=` session name, if announced.
    pub session_name: Option<String>,

    /// RTP payload type the stream is sent with.
    pub payload_type: u8,

    /// Sample spec declared for that payload type.
    pub sample_spec: SampleSpec,

    /// Group address and port the RTP stream is multicast on.
    pub addr: SocketAddr,
}

impl SdpInfo {
    // ---
    /// Parses one SDP body.
    ///
    /// Requires `v=0`, an `o=` line, a connection address and an
    /// `m=audio ... RTP/AVP <pt>` media line. The payload type's sample
    /// spec comes from an `a=rtpmap:` attribute when present, otherwise
    /// from the static RTP/AVP audio table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` when a required line is missing or
    /// malformed, or when the declared payload has no usable sample spec.
    pub fn parse(body: &str) -> Result<Self> {
        // ---
        let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("v=0") {
            return Err(Error::Decode("SDP does not start with v=0"));
        }

        let mut origin = None;
        let mut session_name = None;
        let mut connection = None;
        let mut media: Option<(u16, u8)> = None;
        let mut rtpmap: Option<(u8, SampleSpec)> = None;

        for line in lines {
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };
            match kind {
                "o" => origin = Some(value.to_string()),
                "s" => session_name = Some(value.to_string()),
                "c" => connection = Some(parse_connection(value)?),
                "m" if media.is_none() => media = Some(parse_media(value)?),
                "a" => {
                    if let Some(map) = value.strip_prefix("rtpmap:") {
                        if let Some((pt, spec)) = parse_rtpmap(map) {
                            // A mapping for the selected payload wins
                            // over whatever was seen first.
                            let selected = media.map(|(_, selected)| selected);
                            if rtpmap.is_none() || selected == Some(pt) {
                                rtpmap = Some((pt, spec));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let origin = origin.ok_or(Error::Decode("SDP missing o= line"))?;
        let ip = connection.ok_or(Error::Decode("SDP missing c= line"))?;
        let (port, payload_type) = media.ok_or(Error::Decode("SDP missing audio m= line"))?;

        let sample_spec = match rtpmap {
            Some((pt, spec)) if pt == payload_type => spec,
            _ => static_payload_spec(payload_type)
                .ok_or(Error::Decode("unknown payload type without rtpmap"))?,
        };
        sample_spec.validate()?;

        Ok(Self {
            origin,
            session_name,
            payload_type,
            sample_spec,
            addr: SocketAddr::new(ip, port),
        })
    }
}

/// Parses `c=IN IP4 239.1.1.1/127` (the TTL suffix is dropped).
fn parse_connection(value: &str) -> Result<IpAddr> {
    // ---
    let mut parts = value.split_whitespace();
    if parts.next() != Some("IN") {
        return Err(Error::Decode("unsupported c= network type"));
    }
    let addr_type = parts.next().ok_or(Error::Decode("truncated c= line"))?;
    if addr_type != "IP4" && addr_type != "IP6" {
        return Err(Error::Decode("unsupported c= address type"));
    }

    let addr = parts.next().ok_or(Error::Decode("truncated c= line"))?;
    let addr = addr.split('/').next().unwrap_or(addr);
    addr.parse()
        .map_err(|_| Error::Decode("invalid c= address"))
}

/// Parses `m=audio 5004 RTP/AVP 10`, yielding port and first payload type.
fn parse_media(value: &str) -> Result<(u16, u8)> {
    // ---
    let mut parts = value.split_whitespace();
    if parts.next() != Some("audio") {
        return Err(Error::Decode("m= line is not audio"));
    }

    let port = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or(Error::Decode("invalid m= port"))?;

    if parts.next() != Some("RTP/AVP") {
        return Err(Error::Decode("m= transport is not RTP/AVP"));
    }

    let payload_type = parts
        .next()
        .and_then(|p| p.parse::<u8>().ok())
        .filter(|&pt| pt < 128)
        .ok_or(Error::Decode("invalid m= payload type"))?;

    Ok((port, payload_type))
}

/// Parses `rtpmap:10 L16/44100/2`. Unknown codecs yield `None` so the
/// static table can still apply.
fn parse_rtpmap(value: &str) -> Option<(u8, SampleSpec)> {
    // ---
    let (pt, encoding) = value.split_once(char::is_whitespace)?;
    let pt: u8 = pt.trim().parse().ok()?;

    let mut fields = encoding.trim().split('/');
    let codec = fields.next()?;
    let rate: u32 = fields.next()?.parse().ok()?;
    let channels: u8 = match fields.next() {
        Some(c) => c.parse().ok()?,
        None => 1,
    };

    let format = match codec.to_ascii_uppercase().as_str() {
        "PCMU" => SampleFormat::Ulaw,
        "PCMA" => SampleFormat::Alaw,
        "L16" => SampleFormat::S16Be,
        _ => return None,
    };

    Some((
        pt,
        SampleSpec {
            format,
            rate,
            channels,
        },
    ))
}

/// The static RTP/AVP audio assignments this receiver understands.
fn static_payload_spec(payload_type: u8) -> Option<SampleSpec> {
    // ---
    let (format, rate, channels) = match payload_type {
        0 => (SampleFormat::Ulaw, 8_000, 1),
        8 => (SampleFormat::Alaw, 8_000, 1),
        10 => (SampleFormat::S16Be, 44_100, 2),
        11 => (SampleFormat::S16Be, 44_100, 1),
        _ => return None,
    };
    Some(SampleSpec {
        format,
        rate,
        channels,
    })
}
