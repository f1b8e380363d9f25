//! Replica Node
//!
//! [`ReplicaServer`] composes the lock table, local store, transaction buffer
//! and replication coordinator behind the three interface groups a node
//! exposes: client-facing, peer-to-peer and control.

mod handler;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::ReplicaConfig;
use crate::error::{Error, Result};
use crate::naming::{NameResolver, Registry};
use crate::network::NetworkClient;
use crate::replication::{FileContent, ReplicaLocation, ReplicationCoordinator};
use crate::storage::{validate_file_name, FileLockTable, LocalStore};
use crate::txn::{ActiveTransaction, SeqNo, TransactionBuffer, TxnId, WriteSet};

/// Who this node is, where it stores files and how it reaches peers
pub struct NodeIdentity {
    pub location: ReplicaLocation,
    pub storage_dir: PathBuf,
    pub resolver: Arc<dyn NameResolver>,
}

impl NodeIdentity {
    pub fn new(
        location: ReplicaLocation,
        storage_dir: PathBuf,
        resolver: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            location,
            storage_dir,
            resolver,
        }
    }

    /// Identity described by a configuration file, resolving peers through
    /// the configured static registry
    pub fn from_config(config: &ReplicaConfig) -> Self {
        let client = NetworkClient::from_config(&config.network);
        let registry = Registry::from_config(&config.registry, client);
        Self::new(config.location(), config.storage_dir(), Arc::new(registry))
    }
}

/// Primary assignment as reported by the status API
#[derive(Debug, Clone, Serialize)]
pub struct PrimaryAssignment {
    pub file_name: String,
    pub backups: Vec<ReplicaLocation>,
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: u32,
    pub address: String,
    pub alive: bool,
    pub files: Vec<String>,
    pub transactions: Vec<ActiveTransaction>,
    pub primaries: Vec<PrimaryAssignment>,
    pub reported_at: chrono::DateTime<chrono::Utc>,
}

/// A replicated file-storage node
pub struct ReplicaServer {
    location: ReplicaLocation,
    locks: Arc<FileLockTable>,
    store: Arc<LocalStore>,
    buffer: Arc<TransactionBuffer>,
    coordinator: ReplicationCoordinator,
}

impl ReplicaServer {
    /// Open the node's storage directory and wire up its components
    pub async fn open(identity: NodeIdentity) -> Result<Self> {
        let locks = Arc::new(FileLockTable::new());
        let store = Arc::new(LocalStore::open(identity.storage_dir, Arc::clone(&locks)).await?);
        let buffer = Arc::new(TransactionBuffer::new());
        let coordinator = ReplicationCoordinator::new(
            identity.location.clone(),
            Arc::clone(&store),
            Arc::clone(&buffer),
            identity.resolver,
        );

        tracing::info!("Replica {} ready", identity.location);

        Ok(Self {
            location: identity.location,
            locks,
            store,
            buffer,
            coordinator,
        })
    }

    pub fn location(&self) -> &ReplicaLocation {
        &self.location
    }

    pub fn storage_dir(&self) -> &Path {
        self.store.root()
    }

    // ========== Client ==========

    /// Buffer one fragment of a transaction
    pub async fn write(&self, txn_id: TxnId, seq: SeqNo, content: FileContent) {
        self.buffer.write(txn_id, seq, content).await;
    }

    /// Committed content of `file`, followed by the transaction's own
    /// buffered writes when `txn_id` is open on that file
    pub async fn read(&self, txn_id: TxnId, file: &str) -> Result<FileContent> {
        let pending = match self.buffer.file_of(txn_id).await {
            Some(bound) if bound == file => self.buffer.peek(txn_id).await,
            _ => None,
        };

        let data = match pending {
            Some(pending) => {
                let committed = match self.store.read_all(file).await {
                    Ok(committed) => committed,
                    Err(Error::NotFound(_)) => String::new(),
                    Err(e) => return Err(e),
                };
                committed + &pending
            }
            None => self.store.read_all(file).await?,
        };

        Ok(FileContent::new(file, data))
    }

    /// Commit a transaction and replicate it to the file's backups
    pub async fn commit(&self, txn_id: TxnId, expected_count: u64) -> Result<()> {
        self.coordinator.commit(txn_id, expected_count).await
    }

    /// Discard a transaction
    pub async fn abort(&self, txn_id: TxnId) {
        self.coordinator.abort(txn_id).await;
    }

    // ========== Peer ==========

    /// Create the lock entry and an empty backing file (idempotent)
    pub async fn create_file(&self, file: &str) -> Result<()> {
        validate_file_name(file)?;
        self.locks.ensure(file).await;
        self.store.ensure_exists(file).await?;
        Ok(())
    }

    /// Take this node's write lock on `file` until `release_lock`
    pub async fn acquire_lock(&self, file: &str) -> Result<()> {
        self.locks.acquire_write(file).await
    }

    pub async fn release_lock(&self, file: &str) -> Result<()> {
        self.locks.release_write(file).await
    }

    /// Apply a write-set pushed by the file's primary
    pub async fn apply_replicated_write(
        &self,
        txn_id: TxnId,
        file: &str,
        write_set: &WriteSet,
    ) -> Result<()> {
        self.coordinator.apply_replicated_write(txn_id, file, write_set).await
    }

    pub fn is_alive(&self) -> bool {
        self.coordinator.is_alive()
    }

    // ========== Control ==========

    /// Become primary for `file` with the given backup order
    pub async fn assign_primary(
        &self,
        file: &str,
        backups: &[ReplicaLocation],
    ) -> Result<Vec<ReplicaLocation>> {
        self.coordinator.assign_primary(file, backups).await
    }

    // ========== Status ==========

    pub async fn status(&self) -> Result<NodeStatus> {
        let primaries = self
            .coordinator
            .assignments()
            .await
            .into_iter()
            .map(|(file_name, backups)| PrimaryAssignment { file_name, backups })
            .collect();

        Ok(NodeStatus {
            node_id: self.location.id,
            address: self.location.address.clone(),
            alive: self.is_alive(),
            files: self.store.list().await?,
            transactions: self.buffer.active().await,
            primaries,
            reported_at: chrono::Utc::now(),
        })
    }

    /// Periodically drop transactions idle for longer than `max_idle`
    pub fn spawn_reaper(
        self: &Arc<Self>,
        max_idle: Duration,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("Reaping transactions idle for more than {:?}", max_idle);
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let reaped = server.buffer.reap_idle(max_idle).await;
                if !reaped.is_empty() {
                    tracing::warn!("Dropped {} idle transaction(s): {:?}", reaped.len(), reaped);
                }
            }
        })
    }
}
