//! Outgoing transmitters
//!
//! Builds the frames this node originates: multi-packet pushes assembled
//! from the cache, master announcements, the periodic master-to-master
//! sync and the slave's push of local data. Fragmentation packs records
//! into packets of at most `max_payload` bytes; a terminator closes every
//! transaction so receivers know when to drain.

use std::net::IpAddr;

use tracing::{debug, trace};

use crate::data::{DataSource, ReplyFrames};
use crate::engine::Engine;
use crate::network::wire::{DataRecord, Frame, PUSH_HEADER_LEN};

/// Fresh id for a transaction this node originates. Random so concurrent
/// exchanges with the same peer do not collide.
pub(crate) fn random_tx_id() -> u16 {
    rand::random()
}

/// Pack records into batches whose encoded size fits `budget` bytes each.
/// Returns the batches and the count of records skipped because they could
/// never fit even an empty packet.
fn batch_records(records: Vec<DataRecord>, budget: usize) -> (Vec<Vec<DataRecord>>, usize) {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_len = 0usize;
    let mut skipped = 0usize;

    for record in records {
        let record_len = record.encoded_len();
        if current_len + record_len > budget {
            if current_len == 0 {
                skipped += 1;
                continue;
            }
            batches.push(std::mem::take(&mut current));
            current_len = 0;
            if record_len > budget {
                skipped += 1;
                continue;
            }
        }
        current.push(record);
        current_len += record_len;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    (batches, skipped)
}

impl Engine {
    /// Select cache entries for a push: provenance at or below
    /// `max_source`, type matching the filter when one is set.
    fn collect_records(
        &self,
        max_source: DataSource,
        type_filter: Option<u8>,
    ) -> Vec<DataRecord> {
        self.store
            .iter()
            .filter(|d| d.data_source <= max_source)
            .filter(|d| type_filter.map_or(true, |t| d.data_type == t))
            .map(|d| DataRecord {
                source: d.source,
                data_type: d.data_type,
                version: d.version,
                payload: d.payload.clone(),
            })
            .collect()
    }

    /// Transmit a push stream from the cache to `dest`.
    ///
    /// Data packets are numbered from 0; after the last one a terminator
    /// carries the total count. The terminator is always sent for a
    /// filtered push, even an empty one, so a requester can unblock.
    /// Returns the number of data packets sent.
    pub fn push_data(
        &mut self,
        iface: usize,
        dest: IpAddr,
        max_source: DataSource,
        type_filter: Option<u8>,
        tx_id: u16,
    ) -> u16 {
        let budget = self.max_payload.saturating_sub(PUSH_HEADER_LEN);
        let records = self.collect_records(max_source, type_filter);
        let (batches, skipped) = batch_records(records, budget);
        if skipped > 0 {
            self.oversize_skipped += skipped as u64;
            debug!(skipped, tx_id, "records too large for any packet");
        }

        let mut seqno: u16 = 0;
        for batch in batches {
            let frame = Frame::PushData {
                tx_id,
                seqno,
                records: batch,
            };
            self.transport.send_frame(iface, dest, &frame.encode());
            seqno += 1;
        }

        if seqno > 0 || type_filter.is_some() {
            let txend = Frame::StatusTxEnd { tx_id, seqno };
            self.transport.send_frame(iface, dest, &txend.encode());
        }
        trace!(%dest, tx_id, packets = seqno, "push done");
        seqno
    }

    /// Announce master role: one empty announcement to the multicast group
    /// on every interface.
    pub fn announce_master(&mut self) {
        let frame = Frame::AnnounceMaster.encode();
        for iface in 0..self.interfaces.len() {
            self.transport.send_frame(iface, self.mcast_addr, &frame);
        }
    }

    /// Master-to-master sync: push everything we hold first-hand (our own
    /// data and our slaves') to every master on every interface, each
    /// under a fresh transaction id.
    pub fn sync_data(&mut self) {
        let targets: Vec<(usize, IpAddr)> = self
            .interfaces
            .iter()
            .enumerate()
            .flat_map(|(iface, nif)| nif.servers.iter().map(move |s| (iface, s.address)))
            .collect();
        for (iface, address) in targets {
            self.push_data(iface, address, DataSource::FirstHand, None, random_tx_id());
        }
    }

    /// Slave push: send locally contributed data to the elected master.
    /// Returns false when no master is known yet.
    pub fn push_local_data(&mut self) -> bool {
        let Some(best) = self.best_server.clone() else {
            return false;
        };
        for iface in 0..self.interfaces.len() {
            self.push_data(iface, best.address, DataSource::Local, None, random_tx_id());
        }
        true
    }

    /// Assemble the frames a master hands straight back to a requesting
    /// local client: the filtered push stream plus its terminator, encoded
    /// exactly as they would appear on the wire.
    pub(crate) fn build_client_frames(
        &mut self,
        type_filter: Option<u8>,
        tx_id: u16,
    ) -> ReplyFrames {
        let budget = self.max_payload.saturating_sub(PUSH_HEADER_LEN);
        let records = self.collect_records(DataSource::Synced, type_filter);
        let (batches, skipped) = batch_records(records, budget);
        if skipped > 0 {
            self.oversize_skipped += skipped as u64;
        }

        let mut frames = Vec::with_capacity(batches.len() + 1);
        let mut seqno: u16 = 0;
        for batch in batches {
            frames.push(
                Frame::PushData {
                    tx_id,
                    seqno,
                    records: batch,
                }
                .encode(),
            );
            seqno += 1;
        }
        frames.push(Frame::StatusTxEnd { tx_id, seqno }.encode());
        frames
    }
}
