//! Local file store
//!
//! Flat directory of committed file contents, one file per name. Every read
//! and append goes through the file's lock in the [`FileLockTable`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedRwLockWriteGuard;

use super::FileLockTable;
use crate::error::{Error, Result};

/// Persisted file contents of this node
pub struct LocalStore {
    root: PathBuf,
    locks: Arc<FileLockTable>,
}

impl LocalStore {
    /// Open the store rooted at `root`, creating the directory if needed
    pub async fn open(root: PathBuf, locks: Arc<FileLockTable>) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        tracing::info!("Local store at {}", root.display());
        Ok(Self { root, locks })
    }

    /// Store directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The lock table gating this store
    pub fn locks(&self) -> &Arc<FileLockTable> {
        &self.locks
    }

    /// Path of a stored file
    pub fn path_for(&self, file: &str) -> Result<PathBuf> {
        validate_file_name(file)?;
        Ok(self.root.join(file))
    }

    /// Check whether a file has been created
    pub async fn exists(&self, file: &str) -> Result<bool> {
        Ok(fs::try_exists(self.path_for(file)?).await?)
    }

    /// Create an empty file if it does not exist yet
    pub async fn ensure_exists(&self, file: &str) -> Result<()> {
        let path = self.path_for(file)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(())
    }

    /// Read the whole committed content under the file's read lock
    pub async fn read_all(&self, file: &str) -> Result<String> {
        let path = self.path_for(file)?;
        if !fs::try_exists(&path).await? {
            return Err(Error::NotFound(file.to_string()));
        }

        let _guard = self.locks.read(file).await?;
        let content = fs::read_to_string(&path).await?;
        Ok(content)
    }

    /// Append under the file's write lock
    pub async fn append(&self, file: &str, content: &str) -> Result<()> {
        let guard = self.locks.write(file).await?;
        self.append_locked(file, content, &guard).await
    }

    /// Append while the caller holds the file's write guard from
    /// [`FileLockTable::write`]
    pub async fn append_locked(
        &self,
        file: &str,
        content: &str,
        _guard: &OwnedRwLockWriteGuard<()>,
    ) -> Result<()> {
        let path = self.path_for(file)?;
        append_bytes(&path, content.as_bytes()).await?;
        tracing::debug!("Appended {} bytes to {}", content.len(), file);
        Ok(())
    }

    /// Append on behalf of a caller that already holds the write lock
    /// through [`FileLockTable::acquire_write`]
    pub async fn append_held(&self, file: &str, content: &str) -> Result<()> {
        let path = self.path_for(file)?;
        if !self.locks.is_write_held(file).await {
            return Err(Error::LockNotHeld(file.to_string()));
        }
        append_bytes(&path, content.as_bytes()).await?;
        tracing::debug!("Appended {} replicated bytes to {}", content.len(), file);
        Ok(())
    }

    /// Names of all stored files, sorted
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reject names that would leave the flat store directory
pub fn validate_file_name(file: &str) -> Result<()> {
    let invalid = file.is_empty()
        || file == "."
        || file == ".."
        || file.contains('/')
        || file.contains('\\')
        || file.contains('\0');

    if invalid {
        return Err(Error::InvalidFileName(file.to_string()));
    }
    Ok(())
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_data().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn open_store(dir: &Path) -> LocalStore {
        LocalStore::open(dir.join("Replica1"), Arc::new(FileLockTable::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        assert!(matches!(store.read_all("nope.txt").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.locks().ensure("doc.txt").await;

        store.ensure_exists("doc.txt").await.unwrap();
        assert_eq!(store.read_all("doc.txt").await.unwrap(), "");

        store.append("doc.txt", "Hello, ").await.unwrap();
        store.append("doc.txt", "World").await.unwrap();
        assert_eq!(store.read_all("doc.txt").await.unwrap(), "Hello, World");

        // Raw bytes, no header or line rewriting
        let raw = std::fs::read(store.path_for("doc.txt").unwrap()).unwrap();
        assert_eq!(raw, b"Hello, World");
    }

    #[tokio::test]
    async fn test_ensure_exists_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.locks().ensure("a.txt").await;

        store.ensure_exists("a.txt").await.unwrap();
        store.append("a.txt", "keep").await.unwrap();
        store.ensure_exists("a.txt").await.unwrap();

        assert_eq!(store.read_all("a.txt").await.unwrap(), "keep");
        assert_eq!(store.list().await.unwrap(), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_append_locked_keeps_writers_out() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.locks().ensure("doc.txt").await;

        let guard = store.locks().write("doc.txt").await.unwrap();
        store.append_locked("doc.txt", "first", &guard).await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), store.append("doc.txt", "second"))
                .await
                .is_err()
        );
        store.append_locked("doc.txt", " then more", &guard).await.unwrap();
        drop(guard);

        store.append("doc.txt", "!").await.unwrap();
        assert_eq!(store.read_all("doc.txt").await.unwrap(), "first then more!");
    }

    #[tokio::test]
    async fn test_append_without_lock_entry() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;

        assert!(matches!(
            store.append("doc.txt", "x").await,
            Err(Error::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_append_held_requires_parked_lock() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.locks().ensure("doc.txt").await;

        assert!(matches!(
            store.append_held("doc.txt", "x").await,
            Err(Error::LockNotHeld(_))
        ));

        store.locks().acquire_write("doc.txt").await.unwrap();
        store.append_held("doc.txt", "replicated").await.unwrap();
        store.locks().release_write("doc.txt").await.unwrap();

        assert_eq!(store.read_all("doc.txt").await.unwrap(), "replicated");
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("doc.txt").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a/b").is_err());
    }
}
