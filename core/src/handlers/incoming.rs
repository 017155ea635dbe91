//! Incoming frame dispatcher
//!
//! Entry point for every datagram the sockets hand over. Enforces the
//! source discipline (no looped-back frames, IPv6 sources must be EUI-64
//! link-local), decodes, and routes by frame type. Malformed traffic is
//! dropped silently; UDP is best-effort and the next periodic exchange
//! recovers anything missed.

use std::net::IpAddr;
use std::time::Instant;

use tracing::{debug, trace};

use crate::data::{ReplyFrames, Transaction, TransactionKey};
use crate::engine::Engine;
use crate::network::resolve::is_eui64_link_local;
use crate::network::wire::{DataRecord, Frame};
use crate::protocol::{OpMode, ProtocolEvent};

impl Engine {
    /// Handle one received datagram. Returns whether the frame was
    /// accepted; every rejection is a silent drop.
    pub fn handle_frame(&mut self, iface: usize, src: IpAddr, bytes: &[u8], now: Instant) -> bool {
        if iface >= self.interfaces.len() {
            return false;
        }
        if bytes.len() > self.max_payload {
            trace!(%src, len = bytes.len(), "datagram exceeds receive ceiling");
            return false;
        }
        if self.is_own_address(&src) {
            return false;
        }
        if !self.ipv4_mode {
            match src {
                IpAddr::V6(v6) if is_eui64_link_local(&v6) => {}
                _ => {
                    trace!(%src, "source is not EUI-64 link-local");
                    return false;
                }
            }
        }

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(%src, error = %e, "dropping undecodable frame");
                return false;
            }
        };

        match frame {
            Frame::AnnounceMaster => self.handle_announce(iface, src, now),
            Frame::Request {
                requested_type,
                tx_id,
            } => self.handle_request(iface, src, requested_type, tx_id),
            Frame::PushData {
                tx_id,
                seqno,
                records,
            } => self.handle_push(iface, src, tx_id, seqno, records, now),
            Frame::StatusTxEnd { tx_id, seqno } => {
                self.handle_txend(iface, src, tx_id, seqno, now)
            }
        }
    }

    /// A master announced itself: track it on this interface.
    fn handle_announce(&mut self, iface: usize, src: IpAddr, now: Instant) -> bool {
        let Some(mac) = self.resolver.resolve(iface, src) else {
            trace!(%src, "announce from unresolvable address");
            return false;
        };
        let Some(nif) = self.interfaces.get_mut(iface) else {
            return false;
        };
        let known = nif.servers.get(&mac).is_some();
        nif.servers.on_announce(mac, src, now);
        if !known {
            debug!(master = %mac, %src, iface = %nif.name, "new master");
        }
        true
    }

    /// A peer asked for data of one type: answer immediately with a full
    /// filtered push, any provenance.
    fn handle_request(
        &mut self,
        iface: usize,
        src: IpAddr,
        requested_type: u8,
        tx_id: u16,
    ) -> bool {
        trace!(%src, requested_type, tx_id, "request");
        self.push_data(
            iface,
            src,
            crate::data::DataSource::Synced,
            Some(requested_type),
            tx_id,
        );
        true
    }

    /// Buffer one data packet of a transaction.
    fn handle_push(
        &mut self,
        iface: usize,
        src: IpAddr,
        tx_id: u16,
        seqno: u16,
        records: Vec<DataRecord>,
        now: Instant,
    ) -> bool {
        let Some(peer) = self.resolver.resolve(iface, src) else {
            trace!(%src, "push from unresolvable address");
            return false;
        };
        let key = TransactionKey { peer, tx_id };

        if !self.transactions.contains(&key) {
            // Masters accept unsolicited pushes (other masters syncing).
            // Slaves only hold transactions they opened at request time.
            if self.opmode != OpMode::Master {
                trace!(%peer, tx_id, "push for unknown transaction in slave mode");
                return false;
            }
            self.transactions.insert(Transaction::new(peer, tx_id, now));
        }

        let Some(transaction) = self.transactions.get_mut(&key) else {
            return false;
        };
        transaction.last_rx_time = now;
        if !transaction.add_packet(seqno, records) {
            trace!(%peer, tx_id, seqno, "duplicate packet");
            return true;
        }

        self.try_finish(key, now);
        true
    }

    /// A terminator arrived: note the expected packet count and finish if
    /// everything is already buffered.
    fn handle_txend(
        &mut self,
        iface: usize,
        src: IpAddr,
        tx_id: u16,
        total_packets: u16,
        now: Instant,
    ) -> bool {
        let Some(peer) = self.resolver.resolve(iface, src) else {
            trace!(%src, "terminator from unresolvable address");
            return false;
        };
        let key = TransactionKey { peer, tx_id };

        if !self.transactions.contains(&key) {
            // An empty terminator for a transaction we never saw carries
            // nothing worth tracking.
            if self.opmode != OpMode::Master || total_packets == 0 {
                trace!(%peer, tx_id, "terminator for unknown transaction");
                return false;
            }
            self.transactions.insert(Transaction::new(peer, tx_id, now));
        }

        let Some(transaction) = self.transactions.get_mut(&key) else {
            return false;
        };
        transaction.expected_packets = Some(total_packets);
        transaction.last_rx_time = now;

        self.try_finish(key, now);
        true
    }

    /// Drain a transaction once every announced packet is buffered: apply
    /// all records to the cache in arrival order, then hand the result to
    /// the waiting client if there is one.
    pub(crate) fn try_finish(&mut self, key: TransactionKey, now: Instant) -> bool {
        let complete = self
            .transactions
            .get(&key)
            .map_or(false, Transaction::is_complete);
        if !complete {
            return false;
        }
        let Some(mut transaction) = self.transactions.remove(&key) else {
            return false;
        };

        for packet in &transaction.packets {
            for record in &packet.records {
                if self.store.upsert_remote(record, transaction.peer, now) {
                    trace!(
                        source = %record.source,
                        data_type = record.data_type,
                        payload = %hex::encode(&record.payload),
                        "dataset updated"
                    );
                    self.emit(ProtocolEvent::DataChanged {
                        data_type: record.data_type,
                    });
                }
            }
        }

        debug!(
            peer = %transaction.peer,
            tx_id = transaction.tx_id,
            packets = transaction.num_packets(),
            "transaction finished"
        );

        if let Some(client) = transaction.client.take() {
            if client.send(client_reply_frames(&transaction)).is_err() {
                debug!(tx_id = transaction.tx_id, "requesting client went away");
            }
        }
        true
    }
}

/// Re-encode a drained transaction for delivery to the requesting client:
/// the buffered push frames in arrival order, then the terminator.
fn client_reply_frames(transaction: &Transaction) -> ReplyFrames {
    let mut frames = Vec::with_capacity(transaction.packets.len() + 1);
    for packet in &transaction.packets {
        frames.push(
            Frame::PushData {
                tx_id: transaction.tx_id,
                seqno: packet.seqno,
                records: packet.records.clone(),
            }
            .encode(),
        );
    }
    frames.push(
        Frame::StatusTxEnd {
            tx_id: transaction.tx_id,
            seqno: transaction.packets.len() as u16,
        }
        .encode(),
    );
    frames
}
