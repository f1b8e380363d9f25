//! Transaction Module
//!
//! Buffers client writes per transaction until commit or abort.

mod buffer;

pub use buffer::{ActiveTransaction, TransactionBuffer};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Caller-assigned transaction identifier
pub type TxnId = u64;

/// Sequence number of a fragment within a transaction
pub type SeqNo = u64;

/// Ordered fragments of one transaction, keyed by sequence number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSet {
    fragments: BTreeMap<SeqNo, String>,
}

impl WriteSet {
    /// Insert a fragment, replacing any fragment already at `seq`
    pub fn insert(&mut self, seq: SeqNo, content: String) -> Option<String> {
        self.fragments.insert(seq, content)
    }

    /// Number of distinct sequence numbers
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments in ascending sequence order
    pub fn iter(&self) -> impl Iterator<Item = (&SeqNo, &String)> {
        self.fragments.iter()
    }

    /// Concatenate all fragments in ascending sequence order
    pub fn concat(&self) -> String {
        let size = self.fragments.values().map(String::len).sum();
        let mut out = String::with_capacity(size);
        for content in self.fragments.values() {
            out.push_str(content);
        }
        out
    }
}

impl FromIterator<(SeqNo, String)> for WriteSet {
    fn from_iter<I: IntoIterator<Item = (SeqNo, String)>>(iter: I) -> Self {
        Self {
            fragments: iter.into_iter().collect(),
        }
    }
}
