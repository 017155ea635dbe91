//! Testing utilities
//!
//! Fixtures for exercising the protocol without sockets: a transport that
//! records every frame instead of sending it, deterministic addresses, and
//! ready-made engines.
//!
//! # Example
//!
//! ```ignore
//! let (mut engine, sent) = engine_with(OpMode::Master, 1);
//! engine.handle_frame(0, ll_addr(1), &Frame::AnnounceMaster.encode(), Instant::now());
//! assert!(sent.all().is_empty());
//! ```

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, NetIf, Transport};
use crate::network::resolve::{mac_to_ipv6_ll, Eui64Resolver, StaticResolver};
use crate::network::wire::{DataRecord, Frame, MacAddr};
use crate::protocol::{Config, OpMode};

/// One frame captured by [`RecordingTransport`].
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub iface: usize,
    pub dest: IpAddr,
    pub bytes: Vec<u8>,
}

/// Transport that records frames instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentFrame>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order.
    pub fn all(&self) -> Vec<SentFrame> {
        self.sent.lock().expect("transport lock").clone()
    }

    /// Everything sent so far, decoded.
    pub fn decoded(&self) -> Vec<Frame> {
        self.all()
            .iter()
            .map(|s| Frame::decode(&s.bytes).expect("recorded frame decodes"))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().expect("transport lock").clear();
    }
}

impl Transport for RecordingTransport {
    fn send_frame(&self, iface: usize, dest: IpAddr, frame: &[u8]) -> bool {
        self.sent.lock().expect("transport lock").push(SentFrame {
            iface,
            dest,
            bytes: frame.to_vec(),
        });
        true
    }
}

/// Deterministic hardware address from a one-byte seed.
pub fn mac(seed: u8) -> MacAddr {
    MacAddr::new([seed; 6])
}

/// The EUI-64 link-local address a node with hardware address `mac(seed)`
/// sends from.
pub fn ll_addr(seed: u8) -> IpAddr {
    IpAddr::V6(mac_to_ipv6_ll(&mac(seed)))
}

/// A dataset record originated by `mac(source_seed)`.
pub fn record(source_seed: u8, data_type: u8, payload: &[u8]) -> DataRecord {
    DataRecord {
        source: mac(source_seed),
        data_type,
        version: 0,
        payload: payload.to_vec(),
    }
}

/// An encoded push-data frame.
pub fn push_frame(tx_id: u16, seqno: u16, records: Vec<DataRecord>) -> Vec<u8> {
    Frame::PushData {
        tx_id,
        seqno,
        records,
    }
    .encode()
}

fn test_interfaces(count: usize) -> Vec<NetIf> {
    (0..count)
        .map(|i| {
            let hwaddr = mac(0xE0 + i as u8);
            NetIf::new(
                format!("test{}", i),
                i as u32 + 1,
                hwaddr,
                vec![ll_addr(0xE0 + i as u8)],
            )
        })
        .collect()
}

/// An engine wired to a recording transport and EUI-64 resolution, with
/// `count` interfaces named `test0..`. Interface `i` has hardware address
/// `mac(0xE0 + i)`.
pub fn engine_with(opmode: OpMode, count: usize) -> (Engine, RecordingTransport) {
    let config = Config::for_testing().with_opmode(opmode);
    let transport = RecordingTransport::new();
    let engine = Engine::new(
        &config,
        test_interfaces(count),
        Box::new(transport.clone()),
        Box::new(Eui64Resolver),
    );
    (engine, transport)
}

/// Like [`engine_with`] but in IPv4 mode, with `10.0.0.1 -> mac(1)` in the
/// resolver table.
pub fn ipv4_engine_with(opmode: OpMode, count: usize) -> (Engine, RecordingTransport) {
    let config = Config::for_testing().with_opmode(opmode).with_ipv4();
    let transport = RecordingTransport::new();
    let mut resolver = StaticResolver::new();
    resolver.insert("10.0.0.1".parse().expect("addr"), mac(1));
    let interfaces = (0..count)
        .map(|i| {
            NetIf::new(
                format!("test{}", i),
                i as u32 + 1,
                mac(0xE0 + i as u8),
                vec![IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 10, i as u8 + 1))],
            )
        })
        .collect();
    let engine = Engine::new(
        &config,
        interfaces,
        Box::new(transport.clone()),
        Box::new(resolver),
    );
    (engine, transport)
}
