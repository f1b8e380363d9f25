//! Replication Protocol
//!
//! Defines the wire protocol spoken by clients, peers and the control
//! authority. Every call is one request frame answered by one reply frame.

use serde::{Deserialize, Serialize};

use crate::txn::{SeqNo, TxnId, WriteSet};

/// Identifier and network address of a replica node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaLocation {
    /// Replica identifier
    pub id: u32,
    /// Address the replica listens on (host:port)
    #[serde(default)]
    pub address: String,
}

impl ReplicaLocation {
    /// Create a new location
    pub fn new(id: u32, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl std::fmt::Display for ReplicaLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.address.is_empty() {
            write!(f, "Replica{}", self.id)
        } else {
            write!(f, "Replica{}@{}", self.id, self.address)
        }
    }
}

/// A named chunk of file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub file_name: String,
    pub data: String,
}

impl FileContent {
    pub fn new(file_name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Protocol messages for node communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // ========== Client ==========
    /// Buffer one fragment of a transaction
    Write {
        txn_id: TxnId,
        seq: SeqNo,
        content: FileContent,
    },

    /// Read a file, overlaying the transaction's own buffered writes
    Read { txn_id: TxnId, file_name: String },

    /// Commit a transaction, declaring how many fragments were sent
    Commit { txn_id: TxnId, expected_count: u64 },

    /// Discard a transaction
    Abort { txn_id: TxnId },

    // ========== Peer ==========
    /// Create the lock entry and backing file
    CreateFile { file_name: String },

    /// Take the exclusive write lock on a file
    AcquireLock { file_name: String },

    /// Release a write lock taken with AcquireLock
    ReleaseLock { file_name: String },

    /// Durably apply a committed write-set (caller holds the write lock)
    ApplyWrite {
        txn_id: TxnId,
        file_name: String,
        write_set: WriteSet,
    },

    /// Liveness probe
    IsAlive,

    // ========== Control ==========
    /// Make this node primary for a file with the given backup order
    AssignPrimary {
        file_name: String,
        backups: Vec<ReplicaLocation>,
    },

    // ========== Replies ==========
    /// Operation succeeded
    Ok,

    /// File content reply
    Content(FileContent),

    /// Liveness reply
    Alive(bool),

    /// Error reply
    Error { code: ErrorCode, message: String },
}

/// Error codes carried in error replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    NotInitialized,
    CountMismatch,
    LockNotHeld,
    NotPrimary,
    RemoteFailure,
    InvalidRequest,
    Io,
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Build an error reply from a local error
    pub fn from_error(err: &crate::Error) -> Self {
        Message::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Write { .. } => "Write",
            Message::Read { .. } => "Read",
            Message::Commit { .. } => "Commit",
            Message::Abort { .. } => "Abort",
            Message::CreateFile { .. } => "CreateFile",
            Message::AcquireLock { .. } => "AcquireLock",
            Message::ReleaseLock { .. } => "ReleaseLock",
            Message::ApplyWrite { .. } => "ApplyWrite",
            Message::IsAlive => "IsAlive",
            Message::AssignPrimary { .. } => "AssignPrimary",
            Message::Ok => "Ok",
            Message::Content(_) => "Content",
            Message::Alive(_) => "Alive",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body accepted from the wire
    pub const MAX_BODY: u32 = 64 * 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
