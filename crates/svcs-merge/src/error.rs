use crate::conflict::ConflictRecord;
use svcs_chunk::StoreError;
use svcs_graph::{GraphError, SnapshotId};
use svcs_index::{IndexError, Region};

/// Errors related to merging
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Some conflicts have no resolution yet; nothing was mutated
    #[error("{} conflict(s) pending between {ours} and {theirs}", conflicts.len())]
    ConflictsPending {
        base: SnapshotId,
        ours: SnapshotId,
        theirs: SnapshotId,
        conflicts: Vec<ConflictRecord>,
    },

    /// Resolution names a region that is not in conflict
    #[error("region {0} is not in conflict")]
    UnknownRegion(Region),

    #[error("region {0} resolved more than once")]
    DuplicateResolution(Region),

    #[error("invalid resolution for {region}: {reason}")]
    InvalidResolution { region: Region, reason: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MergeError {
    /// Whether the request can succeed if repeated with fresh input
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConflictsPending { .. } => true,
            Self::Graph(e) => e.is_retryable(),
            _ => false,
        }
    }
}
