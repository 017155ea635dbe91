//! Protocol state tables
//!
//! In-memory state owned by the engine. Nothing here is persisted; a
//! restarted daemon relearns the mesh through announcements, pushes and
//! local client submissions.
//!
//! - `dataset` - the dataset cache with provenance-aware merging
//! - `server` - per-interface tables of announcing masters
//! - `transaction` - reassembly state for multi-packet pushes

pub mod dataset;
pub mod server;
pub mod transaction;

pub use dataset::{DataKey, DataSource, DataStore, Dataset};
pub use server::{Server, ServerTable};
pub use transaction::{
    ClientHandle, PushPacket, ReplyFrames, Transaction, TransactionKey, TransactionTable,
};
