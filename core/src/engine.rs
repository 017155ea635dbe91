//! Engine: the aggregate protocol state
//!
//! One `Engine` value owns everything the protocol mutates: the dataset
//! cache, the transaction table, the per-interface master tables and the
//! elected best master. It is threaded through every core call and lives
//! inside the single daemon task; nothing here locks.
//!
//! The engine touches the outside world through two narrow seams so the
//! whole protocol runs against fakes in tests:
//!
//! - [`Transport`] sends encoded frames (the daemon plugs in the UDP
//!   multicast sockets, tests plug in a recorder)
//! - [`MacResolver`] maps a frame's source IP to the sender's hardware
//!   address

use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::debug;

use crate::data::{ClientHandle, DataStore, ServerTable, Transaction, TransactionTable};
use crate::network::resolve::MacResolver;
use crate::network::wire::{DataRecord, Frame, MacAddr};
use crate::protocol::{Config, OpMode, ProtocolEvent};

/// Best-effort frame egress. One implementation wraps the daemon's UDP
/// sockets; tests record what would have been sent.
pub trait Transport: Send {
    /// Send one encoded frame from `iface` to `dest` on the protocol port.
    /// Returns false when the frame could not be handed to the network;
    /// UDP is best-effort, so callers ignore the result.
    fn send_frame(&self, iface: usize, dest: IpAddr, frame: &[u8]) -> bool;
}

/// Per-interface context the engine owns: identity plus the masters seen on
/// this link. Socket handles stay in the transport layer.
pub struct NetIf {
    pub name: String,
    /// OS interface index; doubles as the IPv6 scope id.
    pub scope_id: u32,
    /// This interface's hardware address; stamped onto locally contributed
    /// datasets.
    pub hwaddr: MacAddr,
    /// Our own addresses on this link, used to drop looped-back frames.
    pub own_addrs: Vec<IpAddr>,
    /// Masters announcing themselves on this link.
    pub servers: ServerTable,
}

impl NetIf {
    pub fn new(name: impl Into<String>, scope_id: u32, hwaddr: MacAddr, own_addrs: Vec<IpAddr>) -> Self {
        Self {
            name: name.into(),
            scope_id,
            hwaddr,
            own_addrs,
            servers: ServerTable::new(),
        }
    }
}

/// The master a slave currently pushes to and pulls from. Masters are
/// tracked per interface, so the election remembers which interface the
/// winner was heard on; requests to it must leave through that interface's
/// socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestServer {
    pub iface: usize,
    pub hwaddr: MacAddr,
    pub address: IpAddr,
}

/// All mutable protocol state, single-owner.
pub struct Engine {
    pub(crate) opmode: OpMode,
    pub(crate) ipv4_mode: bool,
    pub(crate) max_payload: usize,
    pub(crate) mcast_addr: IpAddr,
    pub(crate) data_ttl: std::time::Duration,
    pub(crate) server_ttl: std::time::Duration,
    pub(crate) transaction_ttl: std::time::Duration,

    pub(crate) store: DataStore,
    pub(crate) transactions: TransactionTable,
    pub(crate) interfaces: Vec<NetIf>,
    pub(crate) best_server: Option<BestServer>,

    pub(crate) transport: Box<dyn Transport>,
    pub(crate) resolver: Box<dyn MacResolver>,
    pub(crate) events: Option<mpsc::UnboundedSender<ProtocolEvent>>,

    /// Records that could never fit a packet and were skipped by the push
    /// transmitter. Surfaced so the loss is visible.
    pub(crate) oversize_skipped: u64,
}

impl Engine {
    pub fn new(
        config: &Config,
        interfaces: Vec<NetIf>,
        transport: Box<dyn Transport>,
        resolver: Box<dyn MacResolver>,
    ) -> Self {
        Self {
            opmode: config.opmode,
            ipv4_mode: config.ipv4_mode,
            max_payload: config.max_payload,
            mcast_addr: config.mcast_group(),
            data_ttl: config.data_ttl(),
            server_ttl: config.server_ttl(),
            transaction_ttl: config.transaction_ttl(),
            store: DataStore::new(),
            transactions: TransactionTable::new(),
            interfaces,
            best_server: None,
            transport,
            resolver,
            events: None,
            oversize_skipped: 0,
        }
    }

    /// Install the event channel consumers read from.
    pub fn set_event_sender(&mut self, tx: mpsc::UnboundedSender<ProtocolEvent>) {
        self.events = Some(tx);
    }

    pub fn opmode(&self) -> OpMode {
        self.opmode
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn transactions(&self) -> &TransactionTable {
        &self.transactions
    }

    pub fn interfaces(&self) -> &[NetIf] {
        &self.interfaces
    }

    pub fn best_server(&self) -> Option<&BestServer> {
        self.best_server.as_ref()
    }

    /// Count of records skipped because they could never fit a packet.
    pub fn oversize_skipped(&self) -> u64 {
        self.oversize_skipped
    }

    /// Hardware address stamped onto locally contributed datasets: the
    /// first interface's.
    pub fn primary_hwaddr(&self) -> Option<MacAddr> {
        self.interfaces.first().map(|nif| nif.hwaddr)
    }

    pub(crate) fn is_own_address(&self, addr: &IpAddr) -> bool {
        self.interfaces
            .iter()
            .any(|nif| nif.own_addrs.contains(addr))
    }

    pub(crate) fn emit(&self, event: ProtocolEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Inject a link-quality reading for a master on one interface.
    /// Whatever mesh layer the deployment has calls this; elections prefer
    /// higher readings.
    pub fn set_link_quality(&mut self, iface: usize, hwaddr: MacAddr, tq: u8) -> bool {
        match self.interfaces.get_mut(iface) {
            Some(nif) => nif.servers.set_tq(hwaddr, tq),
            None => false,
        }
    }

    /// Store data submitted by a local client. The source address is
    /// stamped with our own hardware address, whatever the client put in
    /// the record.
    pub fn client_set_data(&mut self, records: Vec<DataRecord>, now: Instant) -> bool {
        let Some(own) = self.primary_hwaddr() else {
            debug!("no interface bound, dropping client data");
            return false;
        };
        for record in records {
            self.store
                .upsert_local(own, record.data_type, record.version, record.payload, now);
        }
        true
    }

    /// Serve a local client's pull.
    ///
    /// A master answers straight from its cache. A slave opens a
    /// client-bound transaction against its elected master and forwards the
    /// request; the reply channel resolves when the transaction completes.
    /// With no master known the handle is dropped and the client sees the
    /// pull fail.
    pub fn handle_client_request(
        &mut self,
        requested_type: u8,
        tx_id: u16,
        client: ClientHandle,
        now: Instant,
    ) {
        match self.opmode {
            OpMode::Master => {
                let frames = self.build_client_frames(Some(requested_type), tx_id);
                let _ = client.send(frames);
            }
            OpMode::Slave => self.register_client_request(requested_type, tx_id, client, now),
        }
    }

    /// Create a transaction bound to a waiting client and ask our master
    /// for the data, out the interface the master was heard on. With no
    /// master known the client gets an empty terminator right away, so a
    /// failed pull is distinguishable from an I/O fault.
    pub fn register_client_request(
        &mut self,
        requested_type: u8,
        tx_id: u16,
        client: ClientHandle,
        now: Instant,
    ) {
        let Some(best) = self.best_server.clone() else {
            debug!(requested_type, tx_id, "client pull with no master known");
            let _ = client.send(vec![Frame::StatusTxEnd { tx_id, seqno: 0 }.encode()]);
            return;
        };
        let mut transaction = Transaction::new(best.hwaddr, tx_id, now);
        transaction.requested_type = Some(requested_type);
        transaction.client = Some(client);
        self.transactions.insert(transaction);

        let frame = Frame::Request {
            requested_type,
            tx_id,
        }
        .encode();
        self.transport.send_frame(best.iface, best.address, &frame);
        debug!(master = %best.hwaddr, requested_type, tx_id, "forwarded client pull");
    }

    /// Free a client-bound transaction whose requester went away before it
    /// completed.
    pub fn cancel_client_request(&mut self, peer: MacAddr, tx_id: u16) -> bool {
        self.transactions
            .remove(&crate::data::TransactionKey { peer, tx_id })
            .is_some()
    }

    /// Scheduler hook: master role announces itself on every interface.
    pub fn tick_announce(&mut self) {
        if self.opmode == OpMode::Master {
            self.announce_master();
        }
    }

    /// Scheduler hook: master role re-syncs its cache to the other masters.
    pub fn tick_sync(&mut self) {
        if self.opmode == OpMode::Master {
            self.sync_data();
        }
    }

    /// Scheduler hook: slave role pushes its local data to its master.
    pub fn tick_push_local(&mut self) {
        if self.opmode == OpMode::Slave && !self.push_local_data() {
            debug!("local push skipped, no master known");
        }
    }

    /// Scheduler hook: drop stale datasets, masters and transactions, then
    /// refresh the best-master choice.
    pub fn tick_sweep(&mut self, now: Instant) {
        let datasets = self.store.sweep(now, self.data_ttl);
        let mut servers = 0;
        for nif in &mut self.interfaces {
            servers += nif.servers.sweep(now, self.server_ttl);
        }
        let transactions = self.transactions.sweep(now, self.transaction_ttl);
        if datasets + servers + transactions > 0 {
            debug!(datasets, servers, transactions, "sweep removed stale state");
        }
        self.update_best_server();
    }

    /// Pick the master to push to: highest link quality, most recent
    /// announce as tiebreak, across all interfaces. The winning entry's
    /// interface is kept so requests go out the link it was heard on.
    pub(crate) fn update_best_server(&mut self) {
        let best = self
            .interfaces
            .iter()
            .enumerate()
            .flat_map(|(iface, nif)| nif.servers.iter().map(move |s| (iface, s)))
            .max_by_key(|(_, s)| (s.tq, s.last_seen));
        let chosen = best.map(|(iface, s)| BestServer {
            iface,
            hwaddr: s.hwaddr,
            address: s.address,
        });
        if chosen != self.best_server {
            match &chosen {
                Some(b) => debug!(master = %b.hwaddr, "best master changed"),
                None => debug!("no master available"),
            }
        }
        self.best_server = chosen;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_with, mac, ll_addr};
    use crate::protocol::OpMode;
    use std::time::Duration;

    #[test]
    fn test_best_server_election() {
        let (mut engine, _sent) = engine_with(OpMode::Slave, 2);
        let now = Instant::now();

        engine.interfaces[0]
            .servers
            .on_announce(mac(1), ll_addr(1), now);
        engine.interfaces[1]
            .servers
            .on_announce(mac(2), ll_addr(2), now);
        engine.set_link_quality(1, mac(2), 200);

        engine.update_best_server();
        assert_eq!(engine.best_server().unwrap().hwaddr, mac(2));
    }

    #[test]
    fn test_best_server_recency_tiebreak() {
        let (mut engine, _sent) = engine_with(OpMode::Slave, 1);
        let start = Instant::now();

        engine.interfaces[0]
            .servers
            .on_announce(mac(1), ll_addr(1), start);
        engine.interfaces[0]
            .servers
            .on_announce(mac(2), ll_addr(2), start + Duration::from_secs(1));

        engine.update_best_server();
        assert_eq!(engine.best_server().unwrap().hwaddr, mac(2));
    }

    #[test]
    fn test_sweep_clears_best_server() {
        let (mut engine, _sent) = engine_with(OpMode::Slave, 1);
        let start = Instant::now();

        engine.interfaces[0]
            .servers
            .on_announce(mac(1), ll_addr(1), start);
        engine.update_best_server();
        assert!(engine.best_server().is_some());

        engine.tick_sweep(start + Duration::from_secs(61));
        assert!(engine.best_server().is_none());
    }

    #[test]
    fn test_client_set_data_stamps_own_source() {
        let (mut engine, _sent) = engine_with(OpMode::Master, 1);
        let now = Instant::now();
        let own = engine.primary_hwaddr().unwrap();

        engine.client_set_data(
            vec![DataRecord {
                source: mac(99), // spoofed by the client, must be ignored
                data_type: 64,
                version: 0,
                payload: b"hello".to_vec(),
            }],
            now,
        );

        let entry = engine
            .store()
            .get(&crate::data::DataKey {
                source: own,
                data_type: 64,
            })
            .unwrap();
        assert_eq!(entry.payload, b"hello");
    }

    #[test]
    fn test_cancel_client_request() {
        let (mut engine, _sent) = engine_with(OpMode::Slave, 1);
        let now = Instant::now();

        engine.interfaces[0]
            .servers
            .on_announce(mac(1), ll_addr(1), now);
        engine.update_best_server();

        let (reply_tx, _reply_rx) = tokio::sync::oneshot::channel();
        engine.register_client_request(64, 42, reply_tx, now);
        assert_eq!(engine.transactions().len(), 1);

        assert!(engine.cancel_client_request(mac(1), 42));
        assert!(engine.transactions().is_empty());
    }

    #[test]
    fn test_pull_leaves_through_best_master_interface() {
        let (mut engine, sent) = engine_with(OpMode::Slave, 2);
        let now = Instant::now();

        // The master was heard on the second interface only.
        engine.interfaces[1]
            .servers
            .on_announce(mac(1), ll_addr(1), now);
        engine.update_best_server();
        assert_eq!(engine.best_server().unwrap().iface, 1);

        let (reply_tx, _reply_rx) = tokio::sync::oneshot::channel();
        engine.register_client_request(64, 42, reply_tx, now);

        // The forwarded request must use that interface's socket; the wrong
        // scope id would never reach the master.
        let all = sent.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].iface, 1);
        assert_eq!(all[0].dest, ll_addr(1));
    }

    #[test]
    fn test_pull_without_master_gets_empty_terminator() {
        let (mut engine, sent) = engine_with(OpMode::Slave, 1);

        let (reply_tx, mut reply_rx) = tokio::sync::oneshot::channel();
        engine.register_client_request(64, 9, reply_tx, Instant::now());

        // The pull fails immediately with an empty terminator instead of a
        // dropped channel, so the client can tell it apart from an I/O
        // fault. Nothing is tracked and nothing hits the network.
        let frames = reply_rx.try_recv().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            Frame::decode(&frames[0]).unwrap(),
            Frame::StatusTxEnd { tx_id: 9, seqno: 0 }
        );
        assert!(engine.transactions().is_empty());
        assert!(sent.all().is_empty());
    }
}
