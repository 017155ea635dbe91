//! Master (server) table
//!
//! Tracks the masters announcing themselves on one interface. The same mesh
//! can be reachable over several links, so each interface keeps its own
//! table. Link quality comes from whatever mesh layer the deployment has
//! and defaults to 0 until injected.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::network::wire::MacAddr;

/// A remote master discovered through its announcements.
#[derive(Debug, Clone)]
pub struct Server {
    pub hwaddr: MacAddr,
    pub address: IpAddr,
    /// Link quality, updated externally. Higher is better.
    pub tq: u8,
    pub last_seen: Instant,
}

/// Per-interface set of known masters, keyed by hardware address.
#[derive(Default)]
pub struct ServerTable {
    servers: HashMap<MacAddr, Server>,
}

impl ServerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement: create the entry on first contact, refresh
    /// `last_seen` every time. The address follows the latest announce.
    pub fn on_announce(&mut self, hwaddr: MacAddr, address: IpAddr, now: Instant) {
        let entry = self.servers.entry(hwaddr).or_insert(Server {
            hwaddr,
            address,
            tq: 0,
            last_seen: now,
        });
        entry.address = address;
        entry.last_seen = now;
    }

    /// Inject a link-quality reading for a known master. Unknown addresses
    /// are ignored.
    pub fn set_tq(&mut self, hwaddr: MacAddr, tq: u8) -> bool {
        match self.servers.get_mut(&hwaddr) {
            Some(server) => {
                server.tq = tq;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, hwaddr: &MacAddr) -> Option<&Server> {
        self.servers.get(hwaddr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Server> {
        self.servers.values()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Evict masters that have stopped announcing.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.servers.len();
        self.servers
            .retain(|_, server| now.saturating_duration_since(server.last_seen) <= ttl);
        before - self.servers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn mac(seed: u8) -> MacAddr {
        MacAddr::new([seed; 6])
    }

    fn addr(seed: u16) -> IpAddr {
        IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, seed))
    }

    #[test]
    fn test_announce_creates_and_refreshes() {
        let mut table = ServerTable::new();
        let start = Instant::now();

        table.on_announce(mac(1), addr(1), start);
        assert_eq!(table.len(), 1);

        let later = start + Duration::from_secs(5);
        table.on_announce(mac(1), addr(1), later);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&mac(1)).unwrap().last_seen, later);
    }

    #[test]
    fn test_address_follows_latest_announce() {
        let mut table = ServerTable::new();
        let now = Instant::now();

        table.on_announce(mac(1), addr(1), now);
        table.on_announce(mac(1), addr(2), now);
        assert_eq!(table.get(&mac(1)).unwrap().address, addr(2));
    }

    #[test]
    fn test_sweep_evicts_stale() {
        let mut table = ServerTable::new();
        let start = Instant::now();

        table.on_announce(mac(1), addr(1), start);
        let later = start + Duration::from_secs(61);
        table.on_announce(mac(2), addr(2), later);

        let removed = table.sweep(later, Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(table.get(&mac(1)).is_none());
        assert!(table.get(&mac(2)).is_some());
    }

    #[test]
    fn test_set_tq() {
        let mut table = ServerTable::new();
        table.on_announce(mac(1), addr(1), Instant::now());

        assert!(table.set_tq(mac(1), 200));
        assert_eq!(table.get(&mac(1)).unwrap().tq, 200);
        assert!(!table.set_tq(mac(9), 200));
    }
}
