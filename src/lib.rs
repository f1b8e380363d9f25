//! WolfReplica - Replicated File Storage Node
//!
//! A node stores named files on local disk, buffers client writes inside
//! transactions and, when it is primary for a file, propagates each committed
//! transaction to that file's backups.
//!
//! # Architecture
//!
//! WolfReplica uses primary/backup replication. An external coordinator
//! assigns one primary per file together with an ordered list of backups.
//! Clients stream numbered fragments to the primary and commit with the
//! fragment count they sent. The primary appends the write-set locally, then
//! updates each backup in turn while holding that backup's write lock.
//!
//! # Features
//!
//! - Per-file reader/writer locks, created once per name
//! - Transaction buffers with last-write-wins per sequence number
//! - Read-your-writes overlay for the caller's open transaction
//! - Sequential, mutually exclusive fan-out to backups
//! - Framed bincode protocol over TCP and an HTTP status API

pub mod config;
pub mod error;
pub mod storage;
pub mod txn;
pub mod replication;
pub mod naming;
pub mod network;
pub mod node;
pub mod api;

pub use config::ReplicaConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::ReplicaConfig;
    pub use crate::error::{Error, Result};
    pub use crate::naming::{NameResolver, Registry};
    pub use crate::network::{NetworkClient, NetworkServer};
    pub use crate::node::{NodeIdentity, ReplicaServer};
    pub use crate::replication::{FileContent, Message, ReplicaLocation};
    pub use crate::txn::{SeqNo, TxnId, WriteSet};
}
