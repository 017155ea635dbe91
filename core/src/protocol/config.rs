//! Protocol configuration

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::network::wire::{LANTERN_PORT, MAX_PAYLOAD};

/// Operating role of this node.
///
/// Masters keep an authoritative cache: they accept unsolicited pushes,
/// answer requests, announce themselves and re-sync their cache to every
/// other master. Slaves push their locally contributed data to one elected
/// master and proxy local client pulls to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Master,
    Slave,
}

impl std::fmt::Display for OpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpMode::Master => write!(f, "master"),
            OpMode::Slave => write!(f, "slave"),
        }
    }
}

/// Configuration for a lantern node
#[derive(Debug, Clone)]
pub struct Config {
    /// Network interfaces to bind. At least one is required to serve.
    pub interfaces: Vec<String>,

    /// Operating role. Default: slave.
    pub opmode: OpMode,

    /// Use IPv4 multicast instead of link-local IPv6.
    pub ipv4_mode: bool,

    /// Multicast group override. If None, uses `ff02::1` (IPv6) or
    /// `224.0.0.66` (IPv4).
    pub mcast_addr: Option<IpAddr>,

    /// UDP port. Default: 0x4242.
    pub port: u16,

    /// Path of the Unix socket local clients talk to.
    pub socket_path: PathBuf,

    /// Largest datagram this node sends or accepts.
    /// Default: 65535.
    pub max_payload: usize,

    /// How often a master announces itself (seconds).
    /// Default: 10
    pub announce_interval_secs: u64,

    /// How often a master re-syncs its cache to the other masters (seconds).
    /// Default: 10
    pub sync_interval_secs: u64,

    /// How often a slave pushes its local data to its master (seconds).
    /// Default: 10
    pub push_interval_secs: u64,

    /// How often stale state is swept (seconds).
    /// Default: 10
    pub sweep_interval_secs: u64,

    /// Retention for remote datasets (seconds).
    /// Default: 600
    pub data_ttl_secs: u64,

    /// Retention for masters that stopped announcing (seconds).
    /// Default: 60
    pub server_ttl_secs: u64,

    /// Retention for transactions with no traffic (seconds).
    /// Default: 10
    pub transaction_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            opmode: OpMode::Slave,
            ipv4_mode: false,
            mcast_addr: None,
            port: LANTERN_PORT,
            socket_path: PathBuf::from("/var/run/lantern.sock"),
            max_payload: MAX_PAYLOAD,
            announce_interval_secs: 10,
            sync_interval_secs: 10,
            push_interval_secs: 10,
            sweep_interval_secs: 10,
            data_ttl_secs: 600,
            server_ttl_secs: 60,
            transaction_ttl_secs: 10,
        }
    }
}

impl Config {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interface to bind
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    /// Set the operating role
    pub fn with_opmode(mut self, opmode: OpMode) -> Self {
        self.opmode = opmode;
        self
    }

    /// Switch to IPv4 multicast
    pub fn with_ipv4(mut self) -> Self {
        self.ipv4_mode = true;
        self
    }

    /// Override the multicast group
    pub fn with_mcast_addr(mut self, addr: IpAddr) -> Self {
        self.mcast_addr = Some(addr);
        self
    }

    /// Set the UDP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the Unix socket path
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = path;
        self
    }

    /// Set the largest datagram size
    pub fn with_max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes.min(MAX_PAYLOAD);
        self
    }

    /// Set the announce interval
    pub fn with_announce_interval(mut self, secs: u64) -> Self {
        self.announce_interval_secs = secs;
        self
    }

    /// Set the master-to-master sync interval
    pub fn with_sync_interval(mut self, secs: u64) -> Self {
        self.sync_interval_secs = secs;
        self
    }

    /// Set the slave push interval
    pub fn with_push_interval(mut self, secs: u64) -> Self {
        self.push_interval_secs = secs;
        self
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Set the dataset retention
    pub fn with_data_ttl(mut self, secs: u64) -> Self {
        self.data_ttl_secs = secs;
        self
    }

    /// Set the master retention
    pub fn with_server_ttl(mut self, secs: u64) -> Self {
        self.server_ttl_secs = secs;
        self
    }

    /// Set the transaction retention
    pub fn with_transaction_ttl(mut self, secs: u64) -> Self {
        self.transaction_ttl_secs = secs;
        self
    }

    /// Configuration for testing (fast intervals, short retention, socket
    /// in the temp directory)
    pub fn for_testing() -> Self {
        Self {
            interfaces: Vec::new(),
            opmode: OpMode::Master,
            ipv4_mode: false,
            mcast_addr: None,
            port: LANTERN_PORT,
            socket_path: std::env::temp_dir().join(format!("lantern-test-{}.sock", std::process::id())),
            max_payload: 1500,
            announce_interval_secs: 1,
            sync_interval_secs: 1,
            push_interval_secs: 1,
            sweep_interval_secs: 1,
            data_ttl_secs: 30,
            server_ttl_secs: 10,
            transaction_ttl_secs: 3,
        }
    }

    /// The multicast group in effect: the override, or the family default.
    pub fn mcast_group(&self) -> IpAddr {
        match self.mcast_addr {
            Some(addr) => addr,
            None if self.ipv4_mode => IpAddr::V4(Ipv4Addr::new(224, 0, 0, 66)),
            None => IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1)),
        }
    }

    pub fn data_ttl(&self) -> Duration {
        Duration::from_secs(self.data_ttl_secs)
    }

    pub fn server_ttl(&self) -> Duration {
        Duration::from_secs(self.server_ttl_secs)
    }

    pub fn transaction_ttl(&self) -> Duration {
        Duration::from_secs(self.transaction_ttl_secs)
    }
}
