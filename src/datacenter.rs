//! Backend data-center address table.
//!
//! A fixed set of five IPv4 and five IPv6 endpoints sharing one port. The
//! handshake carries a signed index; `abs(index) - 1` selects the table
//! entry for the preferred address family.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Port shared by every data-center endpoint.
pub const DC_PORT: u16 = 443;

/// IPv4 data-center addresses, in index order.
pub const DC_IPV4: [Ipv4Addr; 5] = [
    Ipv4Addr::new(149, 154, 175, 50),
    Ipv4Addr::new(149, 154, 167, 51),
    Ipv4Addr::new(149, 154, 175, 100),
    Ipv4Addr::new(149, 154, 167, 91),
    Ipv4Addr::new(149, 154, 171, 5),
];

/// IPv6 data-center addresses, in index order.
pub const DC_IPV6: [Ipv6Addr; 5] = [
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23d, 0xf001, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x067c, 0x04e8, 0xf002, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23d, 0xf003, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x067c, 0x04e8, 0xf004, 0, 0, 0, 0x000a),
    Ipv6Addr::new(0x2001, 0x0b28, 0xf23f, 0xf005, 0, 0, 0, 0x000a),
];

/// Resolve a handshake destination index to a socket address.
///
/// Returns `None` when `abs(index) - 1` falls outside the table; index 0
/// and `i16::MIN` are handled without overflow.
pub fn resolve(index: i16, prefer_ipv6: bool) -> Option<SocketAddr> {
    let slot = (index.unsigned_abs() as usize).checked_sub(1)?;
    let ip: IpAddr = if prefer_ipv6 {
        IpAddr::V6(*DC_IPV6.get(slot)?)
    } else {
        IpAddr::V4(*DC_IPV4.get(slot)?)
    };
    Some(SocketAddr::new(ip, DC_PORT))
}
