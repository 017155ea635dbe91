//! Network layer
//!
//! Contains:
//! - `wire` - the TLV frame codec shared by the UDP path and the local IPC
//! - `netsock` - per-interface UDP multicast sockets and receive loops
//! - `resolve` - hardware-address resolution (EUI-64 and table-backed)

pub mod netsock;
pub mod resolve;
pub mod wire;

pub use wire::{DataRecord, Frame, FrameType, MacAddr, LANTERN_PORT, MAX_PAYLOAD, PROTOCOL_VERSION};
