use crate::snapshot::SnapshotId;
use svcs_chunk::{ChunkId, HashError, StoreError};
use svcs_index::IndexError;

/// Errors related to the snapshot graph
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("invalid branch name '{0}'")]
    InvalidBranchName(String),

    /// The caller's view of the branch tip is out of date
    #[error("stale parent on '{branch}': expected tip {expected}, current tip {current}")]
    StaleParent {
        branch: String,
        expected: SnapshotId,
        current: SnapshotId,
    },

    /// The proposed snapshot does not descend from the tip
    #[error("non-linear history on '{branch}': {proposed} does not descend from {tip}")]
    NonLinearHistory {
        branch: String,
        tip: SnapshotId,
        proposed: SnapshotId,
    },

    /// No common ancestor exists
    #[error("snapshots {a} and {b} share no history")]
    Unrelated { a: SnapshotId, b: SnapshotId },

    /// Snapshot is not reachable from the repository root
    #[error("snapshot {0} is not reachable from the repository root")]
    Unreachable(SnapshotId),

    /// A referenced chunk is absent from the store
    #[error("chunk {0} is not in the store")]
    MissingChunk(ChunkId),

    /// A snapshot takes at most two distinct parents
    #[error("invalid parent list of length {0}")]
    InvalidParents(usize),

    #[error("cycle detected at snapshot {0}")]
    CycleDetected(SnapshotId),

    #[error("journal integrity violated at entry {seq}")]
    JournalCorrupted { seq: u64 },

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl GraphError {
    /// Whether retrying against a fresh tip can succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleParent { .. } | Self::NonLinearHistory { .. })
    }
}
