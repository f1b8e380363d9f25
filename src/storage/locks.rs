//! File Lock Table
//!
//! One reader/writer lock per file name. Locks are created once and never
//! removed. Because peers take and release a write lock in separate remote
//! calls, guards acquired through `acquire_*` are parked in the table until
//! the matching `release_*` call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::error::{Error, Result};

/// Shared handle to a single file's lock
pub type FileLock = Arc<RwLock<()>>;

/// Per-file reader/writer locks
#[derive(Default)]
pub struct FileLockTable {
    /// File name -> lock
    locks: RwLock<HashMap<String, FileLock>>,
    /// Write guards held on behalf of remote callers
    held_writes: Mutex<HashMap<String, OwnedRwLockWriteGuard<()>>>,
    /// Read guards held on behalf of remote callers
    held_reads: Mutex<HashMap<String, Vec<OwnedRwLockReadGuard<()>>>>,
}

impl FileLockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for `file`, creating it if absent. Concurrent callers
    /// always receive the same instance.
    pub async fn ensure(&self, file: &str) -> FileLock {
        if let Some(lock) = self.locks.read().await.get(file) {
            return Arc::clone(lock);
        }

        let mut locks = self.locks.write().await;
        let lock = locks.entry(file.to_string()).or_insert_with(|| {
            tracing::debug!("Created lock for {}", file);
            Arc::new(RwLock::new(()))
        });
        Arc::clone(lock)
    }

    /// Check whether a lock entry exists
    pub async fn contains(&self, file: &str) -> bool {
        self.locks.read().await.contains_key(file)
    }

    /// Get an existing lock
    async fn lock_for(&self, file: &str) -> Result<FileLock> {
        self.locks
            .read()
            .await
            .get(file)
            .cloned()
            .ok_or_else(|| Error::NotInitialized(format!("no lock for {}", file)))
    }

    /// Scoped shared lock
    pub async fn read(&self, file: &str) -> Result<OwnedRwLockReadGuard<()>> {
        Ok(self.lock_for(file).await?.read_owned().await)
    }

    /// Scoped exclusive lock
    pub async fn write(&self, file: &str) -> Result<OwnedRwLockWriteGuard<()>> {
        Ok(self.lock_for(file).await?.write_owned().await)
    }

    /// Take the write lock and hold it until `release_write`
    pub async fn acquire_write(&self, file: &str) -> Result<()> {
        let guard = self.write(file).await?;
        self.held_writes.lock().await.insert(file.to_string(), guard);
        tracing::trace!("Write lock on {} acquired", file);
        Ok(())
    }

    /// Release a write lock taken with `acquire_write`
    pub async fn release_write(&self, file: &str) -> Result<()> {
        self.lock_for(file).await?;
        let guard = self
            .held_writes
            .lock()
            .await
            .remove(file)
            .ok_or_else(|| Error::LockNotHeld(file.to_string()))?;
        drop(guard);
        tracing::trace!("Write lock on {} released", file);
        Ok(())
    }

    /// Take a read lock and hold it until `release_read`
    pub async fn acquire_read(&self, file: &str) -> Result<()> {
        let guard = self.read(file).await?;
        self.held_reads
            .lock()
            .await
            .entry(file.to_string())
            .or_default()
            .push(guard);
        Ok(())
    }

    /// Release one read lock taken with `acquire_read`
    pub async fn release_read(&self, file: &str) -> Result<()> {
        self.lock_for(file).await?;
        let mut held = self.held_reads.lock().await;
        let guards = held
            .get_mut(file)
            .ok_or_else(|| Error::LockNotHeld(file.to_string()))?;
        guards.pop();
        if guards.is_empty() {
            held.remove(file);
        }
        Ok(())
    }

    /// Check whether a write lock is parked for `file`
    pub async fn is_write_held(&self, file: &str) -> bool {
        self.held_writes.lock().await.contains_key(file)
    }

    /// All files with a lock entry, sorted
    pub async fn files(&self) -> Vec<String> {
        let mut files: Vec<_> = self.locks.read().await.keys().cloned().collect();
        files.sort();
        files
    }
}
