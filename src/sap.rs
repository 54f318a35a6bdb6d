//! SAP announcement decoding.
//!
//! Parses RFC 2974 Session Announcement Protocol datagrams: a small
//! binary header carrying the goodbye bit, the originating address and
//! optional authentication data, followed by an SDP body (optionally
//! prefixed with its `application/sdp` MIME type).

use crate::error::{Error, Result};

/// SAP protocol version carried in the header.
const SAP_VERSION: u8 = 1;

/// One decoded SAP announcement.
#[derive(Debug, Clone)]
pub struct SapPacket {
    // ---
    /// True for a deletion announcement; the origin is leaving.
    pub goodbye: bool,

    /// Message identifier hash chosen by the announcer.
    pub msg_id_hash: u16,

    /// The SDP body, still textual.
    pub sdp: String,
}

impl SapPacket {
    // ---
    /// Parses one SAP datagram.
    ///
    /// Encrypted and compressed announcements are rejected; there is no
    /// key management and no decompressor here.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for a short datagram, a version other
    /// than 1, encrypted/compressed payloads, truncated origin or
    /// authentication fields, a non-SDP MIME type, or a non-UTF-8 body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < 4 {
            return Err(Error::Decode("SAP datagram shorter than header"));
        }

        let b0 = data[0];
        if (b0 >> 5) != SAP_VERSION {
            return Err(Error::Decode("unsupported SAP version"));
        }
        if b0 & 0x02 != 0 {
            return Err(Error::Decode("encrypted SAP payload"));
        }
        if b0 & 0x01 != 0 {
            return Err(Error::Decode("compressed SAP payload"));
        }

        let ipv6_origin = b0 & 0x10 != 0;
        let goodbye = b0 & 0x04 != 0;
        let auth_len = data[1] as usize * 4;
        let msg_id_hash = u16::from_be_bytes([data[2], data[3]]);

        let origin_len = if ipv6_origin { 16 } else { 4 };
        let offset = 4 + origin_len + auth_len;
        if offset >= data.len() {
            return Err(Error::Decode("SAP header overruns datagram"));
        }

        let body = &data[offset..];
        let sdp = strip_mime(body)?;
        let sdp = std::str::from_utf8(sdp)
            .map_err(|_| Error::Decode("SAP payload is not UTF-8"))?
            .to_string();

        Ok(Self {
            goodbye,
            msg_id_hash,
            sdp,
        })
    }
}

/// Skips an optional NUL-terminated payload-type string.
///
/// Announcers either start the body directly with `v=` or prefix it with
/// a MIME type; only `application/sdp` is acceptable here.
fn strip_mime(body: &[u8]) -> Result<&[u8]> {
    // ---
    if body.starts_with(b"v=") {
        return Ok(body);
    }

    let nul = body
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::Decode("SAP payload is neither SDP nor typed"))?;

    if &body[..nul] != b"application/sdp" {
        return Err(Error::Decode("unsupported SAP payload type"));
    }
    Ok(&body[nul + 1..])
}
