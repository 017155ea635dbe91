//! Public interface
//!
//! This module provides the public API for running a lantern node.
//!
//! # Module Structure
//!
//! - `core.rs`: Protocol struct, start/stop, the engine event loop
//! - `config.rs`: Config builder
//! - `error.rs`: ProtocolError
//! - `events.rs`: events emitted to the embedding layer
//!
//! # Example
//!
//! ```ignore
//! use lantern_core::protocol::{Config, OpMode, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new()
//!         .with_interface("eth0")
//!         .with_opmode(OpMode::Master);
//!     let protocol = Protocol::start(config).await?;
//!
//!     let mut events = protocol.events().await.unwrap();
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     protocol.stop().await;
//!     Ok(())
//! }
//! ```

pub(crate) mod core;
mod config;
mod error;
mod events;

pub use self::core::Protocol;
pub use config::{Config, OpMode};
pub use error::ProtocolError;
pub use events::ProtocolEvent;
