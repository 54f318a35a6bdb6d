//! RTP packet decoding.
//!
//! Parses RFC 3550 datagrams into the fields the receiver consumes.
//! CSRC lists and header extensions are skipped, padding is honored;
//! anything structurally wrong is a decode error the caller drops.

use crate::error::{Error, Result};

/// RTP protocol version (RFC 3550).
const RTP_VERSION: u8 = 2;

/// Fixed header length before CSRC entries.
const HEADER_LEN: usize = 12;

/// One decoded RTP packet.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    // ---
    /// Payload type, 7 bits (marker bit masked off).
    pub payload_type: u8,

    /// Packet sequence number (wraps at 65535).
    pub sequence: u16,

    /// RTP timestamp in sample units.
    pub timestamp: u32,

    /// Synchronization source identifier.
    pub ssrc: u32,

    /// Payload bytes after header, CSRC list, extension and padding.
    pub payload: Vec<u8>,
}

impl RtpPacket {
    // ---
    /// Parses one datagram.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if:
    /// - the datagram is shorter than the fixed header
    /// - the RTP version is not 2
    /// - the CSRC list, extension header or padding overruns the datagram
    /// - no payload bytes remain
    pub fn parse(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < HEADER_LEN {
            return Err(Error::Decode("RTP datagram shorter than header"));
        }

        let b0 = data[0];
        if (b0 >> 6) != RTP_VERSION {
            return Err(Error::Decode("unsupported RTP version"));
        }

        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let payload_type = data[1] & 0x7f;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_LEN + csrc_count * 4;
        if offset > data.len() {
            return Err(Error::Decode("CSRC list overruns datagram"));
        }

        if extension {
            if offset + 4 > data.len() {
                return Err(Error::Decode("extension header overruns datagram"));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if offset > data.len() {
                return Err(Error::Decode("extension body overruns datagram"));
            }
        }

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::Decode("invalid padding length"));
            }
            end -= pad;
        }

        if end <= offset {
            return Err(Error::Decode("empty RTP payload"));
        }

        Ok(Self {
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: data[offset..end].to_vec(),
        })
    }
}
