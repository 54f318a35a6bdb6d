//! Multicast UDP endpoints.
//!
//! Creates the datagram sockets the receiver listens on: address-reuse
//! enabled, joined to the announced group, bound to the group address and
//! port so only that group's traffic arrives.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::Result;

/// Creates a socket listening on `addr`.
///
/// For a multicast address the group is joined on the default interface
/// (`IP_ADD_MEMBERSHIP` / `IPV6_JOIN_GROUP`); a unicast address is
/// plainly bound, which keeps loopback setups working. `SO_REUSEADDR` is
/// set either way so several receivers can share a group.
///
/// # Errors
///
/// Returns `Error::Socket` on any syscall failure. The descriptor is
/// closed on every failure path (the socket closes on drop).
pub fn multicast_socket(addr: &SocketAddr) -> Result<UdpSocket> {
    // ---
    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    match addr {
        SocketAddr::V4(v4) if v4.ip().is_multicast() => {
            socket.join_multicast_v4(v4.ip(), &std::net::Ipv4Addr::UNSPECIFIED)?;
        }
        SocketAddr::V6(v6) if v6.ip().is_multicast() => {
            socket.join_multicast_v6(v6.ip(), 0)?;
            socket.set_only_v6(true)?;
        }
        _ => {}
    }

    socket.bind(&(*addr).into())?;
    socket.set_nonblocking(true)?;

    debug!("listening on {addr}");
    Ok(UdpSocket::from_std(socket.into())?)
}
