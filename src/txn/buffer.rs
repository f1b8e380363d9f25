//! Transaction Buffer
//!
//! Holds uncommitted fragments for every open transaction. A transaction is
//! bound to the file named by its first write and lives until it is
//! finalized and discarded, or aborted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use super::{SeqNo, TxnId, WriteSet};
use crate::error::{Error, Result};
use crate::replication::protocol::FileContent;

/// Buffered state of one open transaction
struct PendingTransaction {
    file_name: String,
    fragments: WriteSet,
    last_write: Instant,
}

/// Snapshot of an open transaction (for status reporting)
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTransaction {
    pub txn_id: TxnId,
    pub file_name: String,
    pub fragments: usize,
    pub idle_secs: u64,
}

/// Per-transaction write buffer
#[derive(Default)]
pub struct TransactionBuffer {
    pending: RwLock<HashMap<TxnId, PendingTransaction>>,
}

impl TransactionBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a fragment. The first write for `txn_id` binds the transaction
    /// to `content.file_name`; later writes are filed under that binding.
    pub async fn write(&self, txn_id: TxnId, seq: SeqNo, content: FileContent) {
        let mut pending = self.pending.write().await;
        let txn = pending.entry(txn_id).or_insert_with(|| {
            tracing::debug!("Transaction {} opened on {}", txn_id, content.file_name);
            PendingTransaction {
                file_name: content.file_name.clone(),
                fragments: WriteSet::default(),
                last_write: Instant::now(),
            }
        });

        if txn.file_name != content.file_name {
            tracing::warn!(
                "Transaction {} is bound to {}, write for {} buffered under the binding",
                txn_id,
                txn.file_name,
                content.file_name
            );
        }

        if txn.fragments.insert(seq, content.data).is_some() {
            tracing::debug!("Transaction {} seq {} overwritten", txn_id, seq);
        }
        txn.last_write = Instant::now();
    }

    /// Concatenation of the buffered fragments, or `None` if the transaction
    /// is not open
    pub async fn peek(&self, txn_id: TxnId) -> Option<String> {
        let pending = self.pending.read().await;
        pending.get(&txn_id).map(|txn| txn.fragments.concat())
    }

    /// Hand out the write-set and its file when exactly `expected_count`
    /// distinct fragments are buffered. The buffer is left in place either way.
    pub async fn finalize(&self, txn_id: TxnId, expected_count: u64) -> Result<(String, WriteSet)> {
        let pending = self.pending.read().await;
        let txn = pending
            .get(&txn_id)
            .ok_or_else(|| Error::NotInitialized(format!("transaction {}", txn_id)))?;

        let actual = txn.fragments.len() as u64;
        if actual != expected_count {
            return Err(Error::CountMismatch {
                txn_id,
                expected: expected_count,
                actual,
            });
        }

        Ok((txn.file_name.clone(), txn.fragments.clone()))
    }

    /// Remove a transaction. Returns whether it was open.
    pub async fn discard(&self, txn_id: TxnId) -> bool {
        self.pending.write().await.remove(&txn_id).is_some()
    }

    /// Check whether a transaction is open
    pub async fn contains(&self, txn_id: TxnId) -> bool {
        self.pending.read().await.contains_key(&txn_id)
    }

    /// File a transaction is bound to
    pub async fn file_of(&self, txn_id: TxnId) -> Option<String> {
        let pending = self.pending.read().await;
        pending.get(&txn_id).map(|txn| txn.file_name.clone())
    }

    /// Number of open transactions
    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.read().await.is_empty()
    }

    /// Snapshot of all open transactions, ordered by id
    pub async fn active(&self) -> Vec<ActiveTransaction> {
        let pending = self.pending.read().await;
        let mut active: Vec<_> = pending
            .iter()
            .map(|(txn_id, txn)| ActiveTransaction {
                txn_id: *txn_id,
                file_name: txn.file_name.clone(),
                fragments: txn.fragments.len(),
                idle_secs: txn.last_write.elapsed().as_secs(),
            })
            .collect();
        active.sort_by_key(|t| t.txn_id);
        active
    }

    /// Drop transactions that have not been written to for `max_idle`
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<TxnId> {
        let mut pending = self.pending.write().await;
        let mut reaped = Vec::new();

        pending.retain(|txn_id, txn| {
            if txn.last_write.elapsed() >= max_idle {
                tracing::info!(
                    "Reaping idle transaction {} on {} ({} fragments)",
                    txn_id,
                    txn.file_name,
                    txn.fragments.len()
                );
                reaped.push(*txn_id);
                return false;
            }
            true
        });

        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(data: &str) -> FileContent {
        FileContent::new("doc.txt", data)
    }

    #[tokio::test]
    async fn test_out_of_order_writes_concat_in_sequence() {
        let buffer = TransactionBuffer::new();
        buffer.write(1, 3, fragment("c")).await;
        buffer.write(1, 1, fragment("a")).await;
        buffer.write(1, 2, fragment("b")).await;

        assert_eq!(buffer.peek(1).await.as_deref(), Some("abc"));

        let (file, write_set) = buffer.finalize(1, 3).await.unwrap();
        assert_eq!(file, "doc.txt");
        assert_eq!(write_set.concat(), "abc");
    }

    #[tokio::test]
    async fn test_duplicate_sequence_last_write_wins() {
        let buffer = TransactionBuffer::new();
        buffer.write(1, 1, fragment("Hello")).await;
        buffer.write(1, 1, fragment("Howdy")).await;
        buffer.write(1, 2, fragment("!")).await;

        assert_eq!(buffer.peek(1).await.as_deref(), Some("Howdy!"));
        assert!(matches!(
            buffer.finalize(1, 3).await,
            Err(Error::CountMismatch { expected: 3, actual: 2, .. })
        ));
        assert!(buffer.finalize(1, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_count_mismatch_leaves_buffer_intact() {
        let buffer = TransactionBuffer::new();
        buffer.write(9, 1, fragment("x")).await;
        buffer.write(9, 2, fragment("y")).await;

        assert!(buffer.finalize(9, 3).await.is_err());
        assert!(buffer.contains(9).await);
        assert_eq!(buffer.peek(9).await.as_deref(), Some("xy"));

        let (_, write_set) = buffer.finalize(9, 2).await.unwrap();
        assert_eq!(write_set.len(), 2);
    }

    #[tokio::test]
    async fn test_first_write_binds_file() {
        let buffer = TransactionBuffer::new();
        buffer.write(4, 1, FileContent::new("a.txt", "1")).await;
        buffer.write(4, 2, FileContent::new("b.txt", "2")).await;

        assert_eq!(buffer.file_of(4).await.as_deref(), Some("a.txt"));
        let (file, write_set) = buffer.finalize(4, 2).await.unwrap();
        assert_eq!(file, "a.txt");
        assert_eq!(write_set.concat(), "12");
    }

    #[tokio::test]
    async fn test_finalize_unknown_transaction() {
        let buffer = TransactionBuffer::new();
        assert!(matches!(
            buffer.finalize(42, 0).await,
            Err(Error::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let buffer = TransactionBuffer::new();
        buffer.write(5, 1, fragment("z")).await;

        assert!(buffer.discard(5).await);
        assert!(!buffer.discard(5).await);
        assert!(buffer.peek(5).await.is_none());
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_reap_idle() {
        let buffer = TransactionBuffer::new();
        buffer.write(1, 1, fragment("a")).await;
        buffer.write(2, 1, fragment("b")).await;

        assert!(buffer.reap_idle(Duration::from_secs(3600)).await.is_empty());
        assert_eq!(buffer.len().await, 2);

        let mut reaped = buffer.reap_idle(Duration::ZERO).await;
        reaped.sort();
        assert_eq!(reaped, vec![1, 2]);
        assert!(buffer.is_empty().await);
    }
}
