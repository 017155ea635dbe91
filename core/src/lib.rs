//! lantern
//!
//! Data-announcement daemon for ad-hoc mesh networks. Nodes on one layer-2
//! segment exchange opaque, type-tagged payloads over link-local UDP
//! multicast so every participant eventually observes every other
//! participant's locally contributed data: hostnames, positions, routing
//! snapshots, whatever the deployment tags.
//!
//! Nodes run in one of two roles. **Masters** keep the authoritative
//! cache: they announce themselves, accept pushes, answer requests, and
//! periodically re-sync to one another. **Slaves** push their local data
//! to an elected master and proxy local client pulls to it.
//!
//! # Module Structure
//!
//! - `protocol/`: public interface (Protocol, Config, events, the engine
//!   event loop)
//! - `engine`: the aggregate protocol state and its seams
//! - `handlers/`: frame dispatch (incoming) and transmitters (outgoing)
//! - `network/`: the TLV wire codec, UDP multicast sockets, address
//!   resolution
//! - `data/`: dataset cache, master tables, transaction reassembly
//! - `ipc/`: the Unix-socket surface local clients talk to
//! - `testing/`: fixtures for socket-free protocol tests
//!
//! # Quick Start
//!
//! ```ignore
//! use lantern_core::{Config, OpMode, Protocol};
//!
//! let config = Config::new().with_interface("eth0").with_opmode(OpMode::Master);
//! let protocol = Protocol::start(config).await?;
//! ```

// Public interface
pub mod protocol;

// Protocol engine and its frame handlers
pub mod engine;
pub(crate) mod handlers;

// Infrastructure modules (pub for embedders and tests)
pub mod data;
pub mod ipc;
pub mod network;
pub mod testing;

// Re-export main API types for convenience
pub use engine::{BestServer, Engine, NetIf, Transport};
pub use network::wire::{DataRecord, Frame, MacAddr, LANTERN_PORT, MAX_PAYLOAD, PROTOCOL_VERSION};
pub use protocol::{Config, OpMode, Protocol, ProtocolError, ProtocolEvent};
