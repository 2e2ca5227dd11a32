//! Source-address predicate applied to every datagram the UDP relay receives.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Which datagram sources a relay socket accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFilter {
    /// `127.0.0.1` on any port.
    Loopback,
    /// Exactly this address and port.
    Exact(SocketAddr),
}

impl AddressFilter {
    pub fn exact(addr: SocketAddr) -> Self {
        AddressFilter::Exact(canonical(addr))
    }

    pub fn admits(&self, source: SocketAddr) -> bool {
        let source = canonical(source);
        match self {
            AddressFilter::Loopback => source.ip() == IpAddr::V4(Ipv4Addr::LOCALHOST),
            AddressFilter::Exact(expected) => source == *expected,
        }
    }
}

/// Collapse IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) to plain IPv4 so a
/// dual-stack socket reports the same peer the resolver returned.
fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}
