//! WolfReplica Error Types

use thiserror::Error;

use crate::replication::protocol::ErrorCode;

/// Result type alias for WolfReplica operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfReplica error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    // Storage errors
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Lock on {0} is not held")]
    LockNotHeld(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    // Transaction errors
    #[error("Fragment count mismatch for transaction {txn_id}: expected {expected}, buffered {actual}")]
    CountMismatch {
        txn_id: u64,
        expected: u64,
        actual: u64,
    },

    // Replication errors
    #[error("Not primary for {0}")]
    NotPrimary(String),

    #[error("Replica {replica} failed during {operation}: {reason}")]
    RemoteFailure {
        replica: String,
        operation: &'static str,
        reason: String,
    },

    #[error("Peer {replica} unreachable: {reason}")]
    PeerUnreachable { replica: String, reason: String },

    #[error("Name not bound in registry: {0}")]
    NotBound(String),

    #[error("Remote error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::NotInitialized(_) => ErrorCode::NotInitialized,
            Error::LockNotHeld(_) => ErrorCode::LockNotHeld,
            Error::InvalidFileName(_) => ErrorCode::InvalidRequest,
            Error::CountMismatch { .. } => ErrorCode::CountMismatch,
            Error::NotPrimary(_) => ErrorCode::NotPrimary,
            Error::RemoteFailure { .. } | Error::PeerUnreachable { .. } | Error::NotBound(_) => {
                ErrorCode::RemoteFailure
            }
            Error::Remote { code, .. } => *code,
            Error::Io(_) => ErrorCode::Io,
            _ => ErrorCode::Internal,
        }
    }

    /// Check if this error came from the transport rather than the peer's logic
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::Network(_)
                | Error::PeerUnreachable { .. }
        )
    }
}
