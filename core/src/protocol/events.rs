//! Protocol events for the embedding layer
//!
//! Emitted over an unbounded channel by the engine; consumers fetch the
//! receiver once via `Protocol::events()`. Hooks and monitoring subscribe
//! here rather than polling the cache.

/// An event emitted by the running daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// The cached bytes under some data type changed: a new dataset
    /// appeared or an existing payload was replaced with different bytes.
    DataChanged {
        /// The type tag of the dataset that changed.
        data_type: u8,
    },
}
