//! Hash-chained branch journal
//!
//! Every branch pointer movement is appended to a tamper-evident log. Each
//! entry's SHA-256 covers its own fields plus the previous entry's hash, so
//! rewriting any past movement breaks the chain.

use crate::error::GraphError;
use crate::snapshot::SnapshotId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of pointer movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchOp {
    Created,
    Advanced,
    Deleted,
}

impl BranchOp {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Advanced => 1,
            Self::Deleted => 2,
        }
    }
}

/// One recorded movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub branch: String,
    pub op: BranchOp,
    /// Tip before the movement (`None` on creation)
    pub from: Option<SnapshotId>,
    pub to: SnapshotId,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

/// Append-only journal shared by all branches
#[derive(Debug, Default)]
pub struct BranchJournal {
    inner: Mutex<Vec<JournalEntry>>,
}

impl BranchJournal {
    pub(crate) fn record(
        &self,
        branch: &str,
        op: BranchOp,
        from: Option<SnapshotId>,
        to: SnapshotId,
    ) -> u64 {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let mut entry = JournalEntry {
            seq: guard.len() as u64,
            timestamp: Utc::now(),
            branch: branch.to_owned(),
            op,
            from,
            to,
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        let seq = entry.seq;
        guard.push(entry);
        seq
    }

    /// All entries in append order
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().clone()
    }

    /// Entries for one branch, in append order
    #[must_use]
    pub fn for_branch(&self, branch: &str) -> Vec<JournalEntry> {
        self.inner
            .lock()
            .iter()
            .filter(|e| e.branch == branch)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every link of the chain
    ///
    /// # Errors
    /// Returns [`GraphError::JournalCorrupted`] at the first broken entry
    pub fn verify_integrity(&self) -> Result<(), GraphError> {
        verify_entries(&self.inner.lock())
    }
}

/// Check a standalone sequence of entries (e.g. an exported journal)
///
/// # Errors
/// Returns [`GraphError::JournalCorrupted`] at the first broken entry
pub fn verify_entries(entries: &[JournalEntry]) -> Result<(), GraphError> {
    let mut prev = [0u8; 32];
    for (position, e) in entries.iter().enumerate() {
        if e.prev_hash != prev || e.hash != compute_hash(e) || e.seq != position as u64 {
            return Err(GraphError::JournalCorrupted { seq: position as u64 });
        }
        prev = e.hash;
    }
    Ok(())
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.branch.as_bytes());
    hasher.update([0]);
    hasher.update([entry.op.as_u8()]);
    match &entry.from {
        Some(from) => {
            hasher.update([1]);
            hasher.update(from.hash().as_bytes());
        }
        None => hasher.update([0]),
    }
    hasher.update(entry.to.hash().as_bytes());
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcs_chunk::ContentHash;

    fn snap(n: u8) -> SnapshotId {
        SnapshotId::from_hash(ContentHash::compute(&[n]))
    }

    #[test]
    fn chain_verifies_and_filters_by_branch() {
        let journal = BranchJournal::default();
        journal.record("main", BranchOp::Created, None, snap(0));
        journal.record("feature", BranchOp::Created, None, snap(0));
        journal.record("main", BranchOp::Advanced, Some(snap(0)), snap(1));

        assert!(journal.verify_integrity().is_ok());
        assert_eq!(journal.for_branch("main").len(), 2);
        assert_eq!(journal.len(), 3);
    }

    #[test]
    fn tampering_is_detected() {
        let journal = BranchJournal::default();
        journal.record("main", BranchOp::Created, None, snap(0));
        journal.record("main", BranchOp::Advanced, Some(snap(0)), snap(1));
        journal.record("main", BranchOp::Advanced, Some(snap(1)), snap(2));

        let mut entries = journal.entries();
        entries[1].to = snap(9);
        assert!(matches!(
            verify_entries(&entries),
            Err(GraphError::JournalCorrupted { seq: 1 })
        ));
    }
}
