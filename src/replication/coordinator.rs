//! Replication Coordinator
//!
//! Owns the primary role for files assigned to this node and drives commit
//! fan-out: the write-set is appended locally first, then pushed to each
//! backup in assignment order, one backup at a time, under that backup's
//! write lock. The primary keeps its own write lock on the file from the
//! local append until fan-out ends, so commits on one file are serialized.
//! The first failing backup stops the fan-out. Nothing is rolled back: the
//! local append and any backups already updated stay updated.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::naming::NameResolver;
use crate::replication::{ReplicaLocation, ReplicaPeer};
use crate::storage::{validate_file_name, LocalStore};
use crate::txn::{TransactionBuffer, TxnId, WriteSet};

/// Commit and replication driver of one node
pub struct ReplicationCoordinator {
    /// This node
    local: ReplicaLocation,
    /// Committed content
    store: Arc<LocalStore>,
    /// Open transactions
    buffer: Arc<TransactionBuffer>,
    /// Naming service used to reach backups
    resolver: Arc<dyn NameResolver>,
    /// File -> ordered backups, for files this node is primary of
    primaries: RwLock<HashMap<String, Vec<Arc<dyn ReplicaPeer>>>>,
}

impl ReplicationCoordinator {
    pub fn new(
        local: ReplicaLocation,
        store: Arc<LocalStore>,
        buffer: Arc<TransactionBuffer>,
        resolver: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            local,
            store,
            buffer,
            resolver,
            primaries: RwLock::new(HashMap::new()),
        }
    }

    /// Become primary for `file` with `backups` in the given order, replacing
    /// any earlier assignment. Backups that cannot be resolved are logged and
    /// left out; this node is never its own backup. Returns the backups kept.
    pub async fn assign_primary(
        &self,
        file: &str,
        backups: &[ReplicaLocation],
    ) -> Result<Vec<ReplicaLocation>> {
        validate_file_name(file)?;

        let mut peers = Vec::with_capacity(backups.len());
        for location in backups {
            if location.id == self.local.id {
                tracing::debug!("Skipping backup {} for {} (that's us)", location, file);
                continue;
            }

            match self.resolver.resolve(location).await {
                Ok(peer) => peers.push(peer),
                Err(e) => {
                    tracing::warn!("Dropping backup {} for {}: {}", location, file, e);
                }
            }
        }

        self.store.locks().ensure(file).await;

        let kept: Vec<_> = peers.iter().map(|p| p.location().clone()).collect();
        tracing::info!(
            "Primary for {} with {} backup(s): {:?}",
            file,
            kept.len(),
            kept.iter().map(|l| l.id).collect::<Vec<_>>()
        );

        self.primaries.write().await.insert(file.to_string(), peers);
        Ok(kept)
    }

    /// Ordered backups of a file this node is primary of
    pub async fn backups(&self, file: &str) -> Option<Vec<ReplicaLocation>> {
        let primaries = self.primaries.read().await;
        primaries
            .get(file)
            .map(|peers| peers.iter().map(|p| p.location().clone()).collect())
    }

    /// All primary assignments, sorted by file name
    pub async fn assignments(&self) -> Vec<(String, Vec<ReplicaLocation>)> {
        let primaries = self.primaries.read().await;
        let mut all: Vec<_> = primaries
            .iter()
            .map(|(file, peers)| {
                (file.clone(), peers.iter().map(|p| p.location().clone()).collect())
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Commit a transaction: validate the fragment count, append locally,
    /// then replicate to every backup in order. The buffer is discarded only
    /// when every step succeeds.
    pub async fn commit(&self, txn_id: TxnId, expected_count: u64) -> Result<()> {
        let (file, write_set) = self.buffer.finalize(txn_id, expected_count).await?;

        let backups = self
            .primaries
            .read()
            .await
            .get(&file)
            .cloned()
            .ok_or_else(|| Error::NotPrimary(file.clone()))?;

        // Held until the last backup is updated so every replica sees commits
        // on this file in the same order
        let guard = self.store.locks().write(&file).await?;
        self.store.append_locked(&file, &write_set.concat(), &guard).await?;
        tracing::debug!("Transaction {} applied locally to {}", txn_id, file);

        for peer in &backups {
            if let Err(e) = self.replicate_to(peer.as_ref(), txn_id, &file, &write_set).await {
                tracing::warn!(
                    "Commit of transaction {} on {} stopped at {}: {}",
                    txn_id,
                    file,
                    peer.location(),
                    e
                );
                return Err(e);
            }
        }
        drop(guard);

        self.buffer.discard(txn_id).await;
        tracing::info!(
            "Committed transaction {} on {} ({} fragments, {} backups)",
            txn_id,
            file,
            write_set.len(),
            backups.len()
        );
        Ok(())
    }

    /// Lock, push and unlock one backup
    async fn replicate_to(
        &self,
        peer: &dyn ReplicaPeer,
        txn_id: TxnId,
        file: &str,
        write_set: &WriteSet,
    ) -> Result<()> {
        peer.acquire_lock(file)
            .await
            .map_err(|e| remote_failure(peer, "acquire_lock", e))?;

        if let Err(e) = peer.apply_replicated_write(txn_id, file, write_set).await {
            if let Err(release) = peer.release_lock(file).await {
                tracing::warn!("Could not release {} on {}: {}", file, peer.location(), release);
            }
            return Err(remote_failure(peer, "apply_replicated_write", e));
        }

        peer.release_lock(file)
            .await
            .map_err(|e| remote_failure(peer, "release_lock", e))?;

        tracing::debug!("Replicated transaction {} on {} to {}", txn_id, file, peer.location());
        Ok(())
    }

    /// Drop a transaction. No locks are held while writes are buffered.
    pub async fn abort(&self, txn_id: TxnId) -> bool {
        let existed = self.buffer.discard(txn_id).await;
        tracing::debug!("Aborted transaction {} (open: {})", txn_id, existed);
        existed
    }

    /// Apply a write-set pushed by a primary. The caller holds this node's
    /// write lock on `file` for the duration of the call.
    pub async fn apply_replicated_write(
        &self,
        txn_id: TxnId,
        file: &str,
        write_set: &WriteSet,
    ) -> Result<()> {
        self.store.ensure_exists(file).await?;
        self.store.append_held(file, &write_set.concat()).await?;
        tracing::debug!(
            "Applied replicated transaction {} to {} ({} fragments)",
            txn_id,
            file,
            write_set.len()
        );
        Ok(())
    }

    /// Liveness probe
    pub fn is_alive(&self) -> bool {
        true
    }
}

fn remote_failure(peer: &dyn ReplicaPeer, operation: &'static str, err: Error) -> Error {
    if err.is_transport() {
        return Error::PeerUnreachable {
            replica: peer.location().to_string(),
            reason: format!("{}: {}", operation, err),
        };
    }

    Error::RemoteFailure {
        replica: peer.location().to_string(),
        operation,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{ErrorCode, FileContent};
    use crate::storage::FileLockTable;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// In-memory stand-in for a remote backup
    struct RecordingPeer {
        location: ReplicaLocation,
        log: CallLog,
        content: Mutex<String>,
        fail_on: Option<&'static str>,
        /// Stall the next acquire by this long
        acquire_delay: Mutex<Option<Duration>>,
    }

    impl RecordingPeer {
        /// Lock calls fail the way a dead host does, applies the way a
        /// peer-side error does
        fn record(&self, op: &'static str) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:{}", self.location.id, op));
            match (self.fail_on == Some(op), op) {
                (false, _) => Ok(()),
                (true, "apply") => Err(Error::Remote {
                    code: ErrorCode::Io,
                    message: "disk full".into(),
                }),
                (true, _) => Err(Error::ConnectionFailed {
                    address: self.location.address.clone(),
                    reason: "connection refused".into(),
                }),
            }
        }
    }

    #[async_trait::async_trait]
    impl ReplicaPeer for RecordingPeer {
        fn location(&self) -> &ReplicaLocation {
            &self.location
        }

        async fn create_file(&self, _file_name: &str) -> Result<()> {
            self.record("create")
        }

        async fn acquire_lock(&self, _file_name: &str) -> Result<()> {
            let delay = self.acquire_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.record("acquire")
        }

        async fn release_lock(&self, _file_name: &str) -> Result<()> {
            self.record("release")
        }

        async fn apply_replicated_write(
            &self,
            _txn_id: TxnId,
            _file_name: &str,
            write_set: &WriteSet,
        ) -> Result<()> {
            self.record("apply")?;
            self.content.lock().unwrap().push_str(&write_set.concat());
            Ok(())
        }

        async fn is_alive(&self) -> Result<bool> {
            Ok(true)
        }
    }

    /// Resolver over a fixed set of recording peers
    struct FixedResolver {
        peers: HashMap<u32, Arc<RecordingPeer>>,
    }

    #[async_trait::async_trait]
    impl NameResolver for FixedResolver {
        async fn resolve(&self, location: &ReplicaLocation) -> Result<Arc<dyn ReplicaPeer>> {
            match self.peers.get(&location.id) {
                Some(peer) => Ok(peer.clone() as Arc<dyn ReplicaPeer>),
                None => Err(Error::NotBound(format!("Replica{}", location.id))),
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<LocalStore>,
        buffer: Arc<TransactionBuffer>,
        coordinator: ReplicationCoordinator,
        log: CallLog,
        peers: HashMap<u32, Arc<RecordingPeer>>,
    }

    async fn fixture(failing: Option<(u32, &'static str)>) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            LocalStore::open(dir.path().join("Replica1"), Arc::new(FileLockTable::new()))
                .await
                .unwrap(),
        );
        let buffer = Arc::new(TransactionBuffer::new());
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));

        let peers: HashMap<u32, Arc<RecordingPeer>> = [2, 3]
            .into_iter()
            .map(|id| {
                let fail_on = failing.filter(|(fid, _)| *fid == id).map(|(_, op)| op);
                let peer = RecordingPeer {
                    location: ReplicaLocation::new(id, format!("127.0.0.1:{}", 7700 + id)),
                    log: Arc::clone(&log),
                    content: Mutex::new(String::new()),
                    fail_on,
                    acquire_delay: Mutex::new(None),
                };
                (id, Arc::new(peer))
            })
            .collect();

        let resolver = Arc::new(FixedResolver { peers: peers.clone() });
        let coordinator = ReplicationCoordinator::new(
            ReplicaLocation::new(1, "127.0.0.1:7701"),
            Arc::clone(&store),
            Arc::clone(&buffer),
            resolver,
        );

        Fixture { _dir: dir, store, buffer, coordinator, log, peers }
    }

    fn backups() -> Vec<ReplicaLocation> {
        vec![ReplicaLocation::new(2, ""), ReplicaLocation::new(3, "")]
    }

    async fn write_hello_world(buffer: &TransactionBuffer) {
        buffer.write(7, 2, FileContent::new("doc.txt", "World")).await;
        buffer.write(7, 1, FileContent::new("doc.txt", "Hello, ")).await;
    }

    #[tokio::test]
    async fn test_commit_replicates_in_order() {
        let f = fixture(None).await;
        f.coordinator.assign_primary("doc.txt", &backups()).await.unwrap();
        write_hello_world(&f.buffer).await;

        f.coordinator.commit(7, 2).await.unwrap();

        assert_eq!(f.store.read_all("doc.txt").await.unwrap(), "Hello, World");
        assert_eq!(
            *f.log.lock().unwrap(),
            vec!["2:acquire", "2:apply", "2:release", "3:acquire", "3:apply", "3:release"]
        );
        assert_eq!(*f.peers[&2].content.lock().unwrap(), "Hello, World");
        assert_eq!(*f.peers[&3].content.lock().unwrap(), "Hello, World");
        assert!(!f.buffer.contains(7).await);
    }

    #[tokio::test]
    async fn test_count_mismatch_mutates_nothing() {
        let f = fixture(None).await;
        f.coordinator.assign_primary("doc.txt", &backups()).await.unwrap();
        write_hello_world(&f.buffer).await;

        let result = f.coordinator.commit(7, 3).await;
        assert!(matches!(result, Err(Error::CountMismatch { expected: 3, actual: 2, .. })));

        assert!(matches!(f.store.read_all("doc.txt").await, Err(Error::NotFound(_))));
        assert!(f.log.lock().unwrap().is_empty());
        assert!(f.buffer.contains(7).await);

        // A corrected retry still goes through
        f.coordinator.commit(7, 2).await.unwrap();
        assert_eq!(f.store.read_all("doc.txt").await.unwrap(), "Hello, World");
    }

    #[tokio::test]
    async fn test_failing_backup_stops_fan_out() {
        let f = fixture(Some((2, "acquire"))).await;
        f.coordinator.assign_primary("doc.txt", &backups()).await.unwrap();
        write_hello_world(&f.buffer).await;

        let result = f.coordinator.commit(7, 2).await;
        match result {
            Err(Error::PeerUnreachable { replica, reason }) => {
                assert!(replica.starts_with("Replica2"));
                assert!(reason.starts_with("acquire_lock"));
            }
            other => panic!("expected PeerUnreachable, got {:?}", other),
        }

        // Local append is kept, C was never contacted
        assert_eq!(f.store.read_all("doc.txt").await.unwrap(), "Hello, World");
        assert_eq!(*f.log.lock().unwrap(), vec!["2:acquire"]);
        assert!(f.peers[&3].content.lock().unwrap().is_empty());
        assert!(f.buffer.contains(7).await);
    }

    #[tokio::test]
    async fn test_failed_apply_releases_backup_lock() {
        let f = fixture(Some((3, "apply"))).await;
        f.coordinator.assign_primary("doc.txt", &backups()).await.unwrap();
        write_hello_world(&f.buffer).await;

        let result = f.coordinator.commit(7, 2).await;
        assert!(matches!(
            result,
            Err(Error::RemoteFailure { operation: "apply_replicated_write", .. })
        ));
        assert_eq!(
            *f.log.lock().unwrap(),
            vec!["2:acquire", "2:apply", "2:release", "3:acquire", "3:apply", "3:release"]
        );
        assert_eq!(*f.peers[&2].content.lock().unwrap(), "Hello, World");
    }

    #[tokio::test]
    async fn test_same_file_commits_reach_backups_in_local_order() {
        let f = fixture(None).await;
        f.coordinator.assign_primary("doc.txt", &backups()).await.unwrap();
        *f.peers[&2].acquire_delay.lock().unwrap() = Some(Duration::from_millis(200));

        f.buffer.write(1, 1, FileContent::new("doc.txt", "aaa")).await;
        f.buffer.write(2, 1, FileContent::new("doc.txt", "bbb")).await;

        // Transaction 2 commits while transaction 1 is stalled on backup 2
        let later = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            f.coordinator.commit(2, 1).await
        };
        let (first, second) = tokio::join!(f.coordinator.commit(1, 1), later);
        first.unwrap();
        second.unwrap();

        let local = f.store.read_all("doc.txt").await.unwrap();
        assert_eq!(local, "aaabbb");
        assert_eq!(*f.peers[&2].content.lock().unwrap(), local);
        assert_eq!(*f.peers[&3].content.lock().unwrap(), local);
    }

    #[tokio::test]
    async fn test_commit_without_assignment() {
        let f = fixture(None).await;
        f.store.locks().ensure("doc.txt").await;
        write_hello_world(&f.buffer).await;

        assert!(matches!(f.coordinator.commit(7, 2).await, Err(Error::NotPrimary(_))));
        assert!(matches!(f.store.read_all("doc.txt").await, Err(Error::NotFound(_))));
        assert!(f.buffer.contains(7).await);
    }

    #[tokio::test]
    async fn test_assign_primary_drops_unresolved_and_self() {
        let f = fixture(None).await;
        let locations = vec![
            ReplicaLocation::new(3, ""),
            ReplicaLocation::new(1, ""),
            ReplicaLocation::new(9, ""),
            ReplicaLocation::new(2, ""),
        ];

        let kept = f.coordinator.assign_primary("doc.txt", &locations).await.unwrap();
        let ids: Vec<_> = kept.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert!(f.store.locks().contains("doc.txt").await);

        // Reassignment replaces the list
        f.coordinator.assign_primary("doc.txt", &[]).await.unwrap();
        assert_eq!(f.coordinator.backups("doc.txt").await, Some(vec![]));
    }

    #[tokio::test]
    async fn test_apply_replicated_write_persists_content() {
        let f = fixture(None).await;
        f.store.locks().ensure("doc.txt").await;
        let write_set: WriteSet = [(1, "Hello, ".to_string()), (2, "World".to_string())]
            .into_iter()
            .collect();

        let unlocked = f.coordinator.apply_replicated_write(7, "doc.txt", &write_set).await;
        assert!(matches!(unlocked, Err(Error::LockNotHeld(_))));

        f.store.locks().acquire_write("doc.txt").await.unwrap();
        f.coordinator.apply_replicated_write(7, "doc.txt", &write_set).await.unwrap();
        f.store.locks().release_write("doc.txt").await.unwrap();

        assert_eq!(f.store.read_all("doc.txt").await.unwrap(), "Hello, World");
    }

    #[tokio::test]
    async fn test_abort_discards_buffer() {
        let f = fixture(None).await;
        write_hello_world(&f.buffer).await;

        assert!(f.coordinator.abort(7).await);
        assert!(!f.coordinator.abort(7).await);
        assert!(f.buffer.peek(7).await.is_none());
    }
}
