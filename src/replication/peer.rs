//! Replica peers
//!
//! A backup is always reached through remote calls. [`ReplicaPeer`] is the
//! peer-to-peer surface a primary uses during commit fan-out; [`RemotePeer`]
//! implements it over [`NetworkClient`].

use crate::error::{Error, Result};
use crate::network::NetworkClient;
use crate::replication::protocol::{Message, ReplicaLocation};
use crate::txn::{TxnId, WriteSet};

/// Peer-to-peer operations of a replica node
#[async_trait::async_trait]
pub trait ReplicaPeer: Send + Sync {
    /// Where this peer lives
    fn location(&self) -> &ReplicaLocation;

    /// Create the lock entry and backing file (idempotent)
    async fn create_file(&self, file_name: &str) -> Result<()>;

    /// Take the peer's write lock on a file
    async fn acquire_lock(&self, file_name: &str) -> Result<()>;

    /// Release the peer's write lock on a file
    async fn release_lock(&self, file_name: &str) -> Result<()>;

    /// Durably apply a committed write-set while holding the peer's write lock
    async fn apply_replicated_write(
        &self,
        txn_id: TxnId,
        file_name: &str,
        write_set: &WriteSet,
    ) -> Result<()>;

    /// Liveness probe
    async fn is_alive(&self) -> Result<bool>;
}

/// Client stub for a replica reachable over TCP
pub struct RemotePeer {
    location: ReplicaLocation,
    address: String,
    client: NetworkClient,
}

impl RemotePeer {
    /// Create a stub calling `address` on behalf of `location`
    pub fn new(location: ReplicaLocation, address: String, client: NetworkClient) -> Self {
        Self {
            location,
            address,
            client,
        }
    }

    /// Address the stub calls
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call_ok(&self, message: Message) -> Result<()> {
        let request = message.type_name();
        match self.client.call(&self.address, message).await? {
            Message::Ok => Ok(()),
            other => Err(Error::Network(format!(
                "Unexpected {} reply to {} from {}",
                other.type_name(),
                request,
                self.location
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ReplicaPeer for RemotePeer {
    fn location(&self) -> &ReplicaLocation {
        &self.location
    }

    async fn create_file(&self, file_name: &str) -> Result<()> {
        self.call_ok(Message::CreateFile {
            file_name: file_name.to_string(),
        })
        .await
    }

    async fn acquire_lock(&self, file_name: &str) -> Result<()> {
        self.call_ok(Message::AcquireLock {
            file_name: file_name.to_string(),
        })
        .await
    }

    async fn release_lock(&self, file_name: &str) -> Result<()> {
        self.call_ok(Message::ReleaseLock {
            file_name: file_name.to_string(),
        })
        .await
    }

    async fn apply_replicated_write(
        &self,
        txn_id: TxnId,
        file_name: &str,
        write_set: &WriteSet,
    ) -> Result<()> {
        self.call_ok(Message::ApplyWrite {
            txn_id,
            file_name: file_name.to_string(),
            write_set: write_set.clone(),
        })
        .await
    }

    async fn is_alive(&self) -> Result<bool> {
        match self.client.call(&self.address, Message::IsAlive).await? {
            Message::Alive(alive) => Ok(alive),
            other => Err(Error::Network(format!(
                "Unexpected {} reply to IsAlive from {}",
                other.type_name(),
                self.location
            ))),
        }
    }
}
