//! Dataset cache
//!
//! In-memory store of one payload per `(source hardware address, type)`
//! key, with provenance tracking. Nothing is persisted: a restarted daemon
//! relearns the mesh through announcements and pushes.
//!
//! # Merge rules
//!
//! - `Local` entries are contributed by clients on this node and are never
//!   overwritten by remote pushes.
//! - A remote record becomes `FirstHand` when the pushing peer is the
//!   record's origin, otherwise `Synced`.
//! - A retention sweep removes remote entries that have not been refreshed
//!   within the TTL; `Local` entries are exempt.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::network::wire::{DataRecord, MacAddr};

/// Provenance of a cached dataset, ordered from most to least trusted.
///
/// The numeric ranks matter: transmitters filter with `data_source >
/// max_source`, so a lower rank always passes a higher cutoff.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataSource {
    /// Contributed by a local client.
    Local = 0,
    /// Received directly from the node that originated it.
    FirstHand = 1,
    /// Received via a third party.
    Synced = 2,
}

/// Cache key: one entry per origin and type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub source: MacAddr,
    pub data_type: u8,
}

/// One cached payload with its provenance and freshness.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub source: MacAddr,
    pub data_type: u8,
    pub version: u8,
    pub payload: Vec<u8>,
    pub data_source: DataSource,
    pub last_seen: Instant,
}

impl Dataset {
    pub fn key(&self) -> DataKey {
        DataKey {
            source: self.source,
            data_type: self.data_type,
        }
    }
}

/// The dataset cache.
#[derive(Default)]
pub struct DataStore {
    entries: HashMap<DataKey, Dataset>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a record received from the network.
    ///
    /// Returns whether the cached bytes changed (entry created, or payload
    /// differs from what was stored). An existing `Local` entry swallows
    /// the record without any effect.
    pub fn upsert_remote(&mut self, record: &DataRecord, sender: MacAddr, now: Instant) -> bool {
        let key = DataKey {
            source: record.source,
            data_type: record.data_type,
        };
        let data_source = if sender == record.source {
            DataSource::FirstHand
        } else {
            DataSource::Synced
        };

        match self.entries.get_mut(&key) {
            Some(entry) if entry.data_source == DataSource::Local => false,
            Some(entry) => {
                let changed = entry.payload != record.payload;
                entry.version = record.version;
                entry.payload = record.payload.clone();
                entry.data_source = data_source;
                entry.last_seen = now;
                changed
            }
            None => {
                self.entries.insert(
                    key,
                    Dataset {
                        source: record.source,
                        data_type: record.data_type,
                        version: record.version,
                        payload: record.payload.clone(),
                        data_source,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Store a payload contributed by a local client. Local data always
    /// wins, whatever is cached under the key.
    pub fn upsert_local(
        &mut self,
        source: MacAddr,
        data_type: u8,
        version: u8,
        payload: Vec<u8>,
        now: Instant,
    ) {
        self.entries.insert(
            DataKey { source, data_type },
            Dataset {
                source,
                data_type,
                version,
                payload,
                data_source: DataSource::Local,
                last_seen: now,
            },
        );
    }

    pub fn get(&self, key: &DataKey) -> Option<&Dataset> {
        self.entries.get(key)
    }

    /// Iterate all entries. Order is unspecified and not stable across
    /// mutations.
    pub fn iter(&self) -> impl Iterator<Item = &Dataset> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove remote entries not refreshed within `ttl`. Local entries stay;
    /// their clients refresh them by re-submitting.
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry.data_source == DataSource::Local
                || now.saturating_duration_since(entry.last_seen) <= ttl
        });
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(seed: u8) -> MacAddr {
        MacAddr::new([seed; 6])
    }

    fn record(source: u8, data_type: u8, payload: &[u8]) -> DataRecord {
        DataRecord {
            source: mac(source),
            data_type,
            version: 0,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_first_hand_vs_synced() {
        let mut store = DataStore::new();
        let now = Instant::now();

        // Pushed by its origin: first hand.
        store.upsert_remote(&record(1, 64, b"a"), mac(1), now);
        // Pushed by a third party: synced.
        store.upsert_remote(&record(2, 64, b"b"), mac(9), now);

        let first = store
            .get(&DataKey {
                source: mac(1),
                data_type: 64,
            })
            .unwrap();
        let synced = store
            .get(&DataKey {
                source: mac(2),
                data_type: 64,
            })
            .unwrap();
        assert_eq!(first.data_source, DataSource::FirstHand);
        assert_eq!(synced.data_source, DataSource::Synced);
    }

    #[test]
    fn test_changed_signal() {
        let mut store = DataStore::new();
        let now = Instant::now();

        // New entry: changed.
        assert!(store.upsert_remote(&record(1, 64, b"a"), mac(1), now));
        // Same bytes: unchanged.
        assert!(!store.upsert_remote(&record(1, 64, b"a"), mac(1), now));
        // Different bytes: changed.
        assert!(store.upsert_remote(&record(1, 64, b"aa"), mac(1), now));
        // Different length, same prefix: changed.
        assert!(store.upsert_remote(&record(1, 64, b"a"), mac(1), now));
    }

    #[test]
    fn test_local_never_overwritten() {
        let mut store = DataStore::new();
        let now = Instant::now();

        store.upsert_local(mac(1), 64, 0, b"mine".to_vec(), now);
        assert!(!store.upsert_remote(&record(1, 64, b"theirs"), mac(1), now));

        let entry = store
            .get(&DataKey {
                source: mac(1),
                data_type: 64,
            })
            .unwrap();
        assert_eq!(entry.payload, b"mine");
        assert_eq!(entry.data_source, DataSource::Local);
    }

    #[test]
    fn test_local_replaces_remote() {
        let mut store = DataStore::new();
        let now = Instant::now();

        store.upsert_remote(&record(1, 64, b"remote"), mac(1), now);
        store.upsert_local(mac(1), 64, 0, b"local".to_vec(), now);

        let entry = store
            .get(&DataKey {
                source: mac(1),
                data_type: 64,
            })
            .unwrap();
        assert_eq!(entry.payload, b"local");
        assert_eq!(entry.data_source, DataSource::Local);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_one_entry_per_key() {
        let mut store = DataStore::new();
        let now = Instant::now();

        store.upsert_remote(&record(1, 64, b"a"), mac(1), now);
        store.upsert_remote(&record(1, 64, b"b"), mac(1), now);
        store.upsert_remote(&record(1, 65, b"c"), mac(1), now);

        assert_eq!(store.len(), 2);
        let entry = store
            .get(&DataKey {
                source: mac(1),
                data_type: 64,
            })
            .unwrap();
        assert_eq!(entry.payload, b"b");
    }

    #[test]
    fn test_synced_downgrade_allowed() {
        let mut store = DataStore::new();
        let now = Instant::now();

        // First hand, then refreshed via a third party: provenance follows
        // the most recent sender.
        store.upsert_remote(&record(1, 64, b"a"), mac(1), now);
        store.upsert_remote(&record(1, 64, b"a"), mac(9), now);
        let entry = store
            .get(&DataKey {
                source: mac(1),
                data_type: 64,
            })
            .unwrap();
        assert_eq!(entry.data_source, DataSource::Synced);
    }

    #[test]
    fn test_sweep_spares_local() {
        let mut store = DataStore::new();
        let start = Instant::now();

        store.upsert_local(mac(1), 64, 0, b"mine".to_vec(), start);
        store.upsert_remote(&record(2, 64, b"old"), mac(2), start);

        let later = start + Duration::from_secs(601);
        store.upsert_remote(&record(3, 64, b"fresh"), mac(3), later);

        let removed = store.sweep(later, Duration::from_secs(600));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 2);
        assert!(store
            .get(&DataKey {
                source: mac(1),
                data_type: 64
            })
            .is_some());
        assert!(store
            .get(&DataKey {
                source: mac(3),
                data_type: 64
            })
            .is_some());
    }

    #[test]
    fn test_provenance_ordering() {
        assert!(DataSource::Local < DataSource::FirstHand);
        assert!(DataSource::FirstHand < DataSource::Synced);
    }
}
