//! Hardware-address resolution.
//!
//! IPv6 peers use EUI-64 link-local source addresses, so their hardware
//! address is recoverable from the address itself. IPv4 peers need a
//! neighbor table; deployments plug their mesh's translation table in
//! through the [`MacResolver`] seam.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};

use crate::network::wire::MacAddr;

/// Maps a frame's source IP to the sending node's hardware address.
///
/// Returning `None` drops the frame: a peer whose address cannot be mapped
/// cannot be tracked.
pub trait MacResolver: Send {
    fn resolve(&self, iface: usize, addr: IpAddr) -> Option<MacAddr>;
}

/// Resolver for IPv6 operation: derives the hardware address from the
/// EUI-64 link-local source. IPv4 addresses do not resolve.
pub struct Eui64Resolver;

impl MacResolver for Eui64Resolver {
    fn resolve(&self, _iface: usize, addr: IpAddr) -> Option<MacAddr> {
        match addr {
            IpAddr::V6(v6) => ipv6_to_mac(&v6),
            IpAddr::V4(_) => None,
        }
    }
}

/// Resolver backed by a fixed address table. Used in tests and in IPv4
/// deployments that snapshot their neighbor table.
#[derive(Default)]
pub struct StaticResolver {
    table: HashMap<IpAddr, MacAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: IpAddr, mac: MacAddr) {
        self.table.insert(addr, mac);
    }
}

impl MacResolver for StaticResolver {
    fn resolve(&self, _iface: usize, addr: IpAddr) -> Option<MacAddr> {
        // Fall back to the EUI-64 derivation for v6 sources not in the table.
        self.table.get(&addr).copied().or_else(|| match addr {
            IpAddr::V6(v6) => ipv6_to_mac(&v6),
            IpAddr::V4(_) => None,
        })
    }
}

/// Whether `addr` is an EUI-64 formed link-local address (fe80::/10 with the
/// ff:fe marker in the interface identifier).
pub fn is_eui64_link_local(addr: &Ipv6Addr) -> bool {
    let o = addr.octets();
    (o[0] == 0xfe && o[1] & 0xc0 == 0x80) && o[11] == 0xff && o[12] == 0xfe
}

/// Recover the hardware address embedded in an EUI-64 link-local address.
pub fn ipv6_to_mac(addr: &Ipv6Addr) -> Option<MacAddr> {
    if !is_eui64_link_local(addr) {
        return None;
    }
    let o = addr.octets();
    Some(MacAddr::new([
        o[8] ^ 0x02,
        o[9],
        o[10],
        o[13],
        o[14],
        o[15],
    ]))
}

/// Build the EUI-64 link-local address a node with this hardware address
/// uses as its frame source.
pub fn mac_to_ipv6_ll(mac: &MacAddr) -> Ipv6Addr {
    let m = mac.octets();
    Ipv6Addr::from([
        0xfe,
        0x80,
        0,
        0,
        0,
        0,
        0,
        0,
        m[0] ^ 0x02,
        m[1],
        m[2],
        0xff,
        0xfe,
        m[3],
        m[4],
        m[5],
    ])
}
