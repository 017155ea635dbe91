//! Transaction table
//!
//! Reassembly state for multi-packet pushes. A transaction is keyed by the
//! pushing peer's hardware address and the 16-bit id it chose; data packets
//! are buffered until the terminator announces the total count, then the
//! whole transaction is drained in one step.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::network::wire::{DataRecord, MacAddr};

/// Encoded frames handed back to a waiting IPC client when its pull
/// completes: the buffered push frames followed by the terminator.
pub type ReplyFrames = Vec<Vec<u8>>;

/// One-shot channel to the connection task serving the requesting client.
/// Dropping it (sweep, daemon shutdown) tells the task the pull failed.
pub type ClientHandle = oneshot::Sender<ReplyFrames>;

/// Key: per peer and transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub peer: MacAddr,
    pub tx_id: u16,
}

/// One buffered data packet of a transaction.
#[derive(Debug, Clone)]
pub struct PushPacket {
    pub seqno: u16,
    pub records: Vec<DataRecord>,
}

/// An in-progress multi-packet exchange.
pub struct Transaction {
    pub peer: MacAddr,
    pub tx_id: u16,
    /// Type filter the requester asked for; `None` means any.
    pub requested_type: Option<u8>,
    /// Buffered packets in arrival order. The finisher applies them in this
    /// order, not seqno order; records within one transaction come from one
    /// sender and are independent.
    pub packets: Vec<PushPacket>,
    /// Total data-packet count announced by the terminator; `None` while
    /// the transaction is still open. `Some(0)` is a legitimate empty
    /// result for a filtered pull.
    pub expected_packets: Option<u16>,
    /// Present when a local client is waiting for this transaction.
    pub client: Option<ClientHandle>,
    pub last_rx_time: Instant,
}

impl Transaction {
    pub fn new(peer: MacAddr, tx_id: u16, now: Instant) -> Self {
        Self {
            peer,
            tx_id,
            requested_type: None,
            packets: Vec::new(),
            expected_packets: None,
            client: None,
            last_rx_time: now,
        }
    }

    pub fn num_packets(&self) -> usize {
        self.packets.len()
    }

    /// Complete iff the terminator arrived and exactly the announced number
    /// of packets is buffered.
    pub fn is_complete(&self) -> bool {
        self.expected_packets
            .map_or(false, |expected| self.packets.len() == expected as usize)
    }

    /// Buffer a data packet. Returns false when a packet with the same
    /// seqno is already buffered (duplicate, dropped silently).
    pub fn add_packet(&mut self, seqno: u16, records: Vec<DataRecord>) -> bool {
        if self.packets.iter().any(|p| p.seqno == seqno) {
            return false;
        }
        self.packets.push(PushPacket { seqno, records });
        true
    }
}

/// All in-progress transactions.
#[derive(Default)]
pub struct TransactionTable {
    transactions: HashMap<TransactionKey, Transaction>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, transaction: Transaction) -> TransactionKey {
        let key = TransactionKey {
            peer: transaction.peer,
            tx_id: transaction.tx_id,
        };
        self.transactions.insert(key, transaction);
        key
    }

    pub fn get(&self, key: &TransactionKey) -> Option<&Transaction> {
        self.transactions.get(key)
    }

    pub fn get_mut(&mut self, key: &TransactionKey) -> Option<&mut Transaction> {
        self.transactions.get_mut(key)
    }

    pub fn remove(&mut self, key: &TransactionKey) -> Option<Transaction> {
        self.transactions.remove(key)
    }

    pub fn contains(&self, key: &TransactionKey) -> bool {
        self.transactions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Reap transactions with no traffic within `ttl`, releasing their
    /// buffers. A waiting client sees its channel close.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.transactions.len();
        self.transactions
            .retain(|_, t| now.saturating_duration_since(t.last_rx_time) <= ttl);
        before - self.transactions.len()
    }
}
