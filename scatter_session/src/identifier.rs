// Short numeric Host identifiers.
//
// On a shared LAN, players find the Host by a number instead of a full
// address: the Host shows the last octet of its IPv4 address, and a Peer
// dials that octet under its own /24 prefix.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use crate::error::{Result, SessionError};

pub fn server_identifier(addr: Ipv4Addr) -> u8 {
    addr.octets()[3]
}

/// Best-effort IPv4 address of this device on its default route. Connecting
/// a UDP socket only selects a route; no packet is sent.
pub fn lan_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Build the dial address for `identifier` (1 to 3 digits, at most 255)
/// on the same /24 as `local`.
pub fn address_from_identifier(
    local: Ipv4Addr,
    identifier: &str,
    port: u16,
) -> Result<SocketAddrV4> {
    let identifier = identifier.trim();
    if identifier.is_empty()
        || identifier.len() > 3
        || !identifier.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(SessionError::Config {
            message: format!("server identifier must be 1-3 digits, got {identifier:?}"),
        });
    }
    let last: u8 = identifier.parse().map_err(|_| SessionError::Config {
        message: format!("server identifier out of range: {identifier}"),
    })?;
    let [a, b, c, _] = local.octets();
    Ok(SocketAddrV4::new(Ipv4Addr::new(a, b, c, last), port))
}
