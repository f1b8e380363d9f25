//! Replication Module
//!
//! Primary/backup replication of committed transactions.

pub mod protocol;
mod peer;
mod coordinator;

pub use protocol::{ErrorCode, FileContent, FrameHeader, Message, ReplicaLocation};
pub use peer::{RemotePeer, ReplicaPeer};
pub use coordinator::ReplicationCoordinator;
