//! Repository error taxonomy
//!
//! Every component error folds into [`RepoError`], whose [`ErrorCode`] is the
//! stable code reported on the control channel and mapped to CLI exit codes.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use svcs_chunk::StoreError;
use svcs_graph::{GraphError, SnapshotId};
use svcs_index::IndexError;
use svcs_ingest::{IngestError, SessionId};
use svcs_merge::{ConflictRecord, MergeError};

/// Main repository error type
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Referenced chunk, snapshot, branch or session is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// The branch moved since the caller read it
    #[error("stale parent on '{branch}': expected {expected}, current tip {current}")]
    StaleParent {
        branch: String,
        expected: SnapshotId,
        current: SnapshotId,
    },

    #[error("non-linear history on '{branch}': {proposed} does not descend from {tip}")]
    NonLinearHistory {
        branch: String,
        tip: SnapshotId,
        proposed: SnapshotId,
    },

    /// Merge requested across disjoint histories
    #[error("snapshots {a} and {b} share no history")]
    Unrelated { a: SnapshotId, b: SnapshotId },

    /// Merge needs resolutions for these regions
    #[error("{} conflict(s) pending", conflicts.len())]
    ConflictsPending {
        base: SnapshotId,
        ours: SnapshotId,
        theirs: SnapshotId,
        conflicts: Vec<ConflictRecord>,
    },

    #[error("session {0} timed out")]
    SessionTimeout(SessionId),

    #[error("session {0} was aborted")]
    SessionAborted(SessionId),

    /// Branch kept moving under a committing session
    #[error("branch busy: {0}")]
    Busy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Repository is shutting down
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RepoError {
    /// Whether the caller can succeed by retrying (possibly with new input)
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleParent { .. }
                | Self::NonLinearHistory { .. }
                | Self::ConflictsPending { .. }
                | Self::Busy(_)
        )
    }

    /// Whether the request can never succeed as issued
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Unrelated { .. } | Self::InvalidRequest(_)
        )
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::StaleParent { .. } => ErrorCode::StaleParent,
            Self::NonLinearHistory { .. } => ErrorCode::NonLinearHistory,
            Self::Unrelated { .. } => ErrorCode::Unrelated,
            Self::ConflictsPending { .. } => ErrorCode::ConflictsPending,
            Self::SessionTimeout(_) => ErrorCode::SessionTimeout,
            Self::SessionAborted(_) => ErrorCode::SessionAborted,
            Self::Busy(_) => ErrorCode::Busy,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Storage(_) => ErrorCode::Storage,
            Self::Config(_) => ErrorCode::Config,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Tip the caller should rebase onto, for concurrency errors
    #[must_use]
    pub const fn current_tip(&self) -> Option<SnapshotId> {
        match self {
            Self::StaleParent { current, .. } => Some(*current),
            Self::NonLinearHistory { tip, .. } => Some(*tip),
            _ => None,
        }
    }

    /// Conflicts awaiting resolution
    #[must_use]
    pub fn conflicts(&self) -> &[ConflictRecord] {
        match self {
            Self::ConflictsPending { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}

/// Stable error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    StaleParent,
    NonLinearHistory,
    Unrelated,
    ConflictsPending,
    SessionTimeout,
    SessionAborted,
    Busy,
    InvalidRequest,
    Storage,
    Config,
    Unavailable,
    Internal,
}

impl ErrorCode {
    /// Process exit status for the CLI
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidRequest => 2,
            Self::NotFound => 3,
            Self::Unrelated => 4,
            Self::StaleParent | Self::NonLinearHistory | Self::Busy => 5,
            Self::ConflictsPending => 6,
            Self::SessionTimeout | Self::SessionAborted => 7,
            Self::Storage => 8,
            Self::Config => 9,
            Self::Unavailable => 10,
            Self::Internal => 70,
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NOT_FOUND",
            Self::StaleParent => "STALE_PARENT",
            Self::NonLinearHistory => "NON_LINEAR_HISTORY",
            Self::Unrelated => "UNRELATED",
            Self::ConflictsPending => "CONFLICTS_PENDING",
            Self::SessionTimeout => "SESSION_TIMEOUT",
            Self::SessionAborted => "SESSION_ABORTED",
            Self::Busy => "BUSY",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Storage => "STORAGE",
            Self::Config => "CONFIG",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

impl From<StoreError> for RepoError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NotFound(format!("chunk {id}")),
            other => Self::Storage(other),
        }
    }
}

impl From<IndexError> for RepoError {
    fn from(e: IndexError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<GraphError> for RepoError {
    fn from(e: GraphError) -> Self {
        match e {
            GraphError::SnapshotNotFound(id) => Self::NotFound(format!("snapshot {id}")),
            GraphError::BranchNotFound(name) => Self::NotFound(format!("branch {name}")),
            GraphError::MissingChunk(id) => Self::NotFound(format!("chunk {id}")),
            GraphError::StaleParent {
                branch,
                expected,
                current,
            } => Self::StaleParent {
                branch,
                expected,
                current,
            },
            GraphError::NonLinearHistory {
                branch,
                tip,
                proposed,
            } => Self::NonLinearHistory {
                branch,
                tip,
                proposed,
            },
            GraphError::Unrelated { a, b } => Self::Unrelated { a, b },
            GraphError::Store(e) => e.into(),
            GraphError::Index(e) => e.into(),
            e @ (GraphError::BranchExists(_)
            | GraphError::InvalidBranchName(_)
            | GraphError::InvalidParents(_)
            | GraphError::Unreachable(_)) => Self::InvalidRequest(e.to_string()),
            e @ (GraphError::CycleDetected(_)
            | GraphError::JournalCorrupted { .. }
            | GraphError::Hash(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<MergeError> for RepoError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::ConflictsPending {
                base,
                ours,
                theirs,
                conflicts,
            } => Self::ConflictsPending {
                base,
                ours,
                theirs,
                conflicts,
            },
            MergeError::Graph(e) => e.into(),
            MergeError::Store(e) => e.into(),
            MergeError::Index(e) => e.into(),
            e @ (MergeError::UnknownRegion(_)
            | MergeError::DuplicateResolution(_)
            | MergeError::InvalidResolution { .. }) => Self::InvalidRequest(e.to_string()),
        }
    }
}

impl From<IngestError> for RepoError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::SessionNotFound(id) => Self::NotFound(format!("session {id}")),
            IngestError::SessionTimeout(id) => Self::SessionTimeout(id),
            IngestError::SessionAborted(id) => Self::SessionAborted(id),
            IngestError::Graph(e) => e.into(),
            IngestError::Merge(e) => e.into(),
            IngestError::Store(e) => e.into(),
            e @ IngestError::RetriesExhausted { .. } => Self::Busy(e.to_string()),
            e @ IngestError::Shutdown => Self::Unavailable(e.to_string()),
            e @ (IngestError::IllegalTransition { .. } | IngestError::Task(_)) => {
                Self::Internal(e.to_string())
            }
            e @ (IngestError::SessionClosed { .. }
            | IngestError::ChannelMismatch { .. }
            | IngestError::ConflictingDuplicate { .. }
            | IngestError::InvalidMessage { .. }
            | IngestError::WrongSession { .. }) => Self::InvalidRequest(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcs_chunk::ContentHash;

    fn snap(n: u8) -> SnapshotId {
        SnapshotId::from_hash(ContentHash::compute(&[n]))
    }

    #[test]
    fn stale_parent_is_retryable_with_tip() {
        let err: RepoError = GraphError::StaleParent {
            branch: "main".into(),
            expected: snap(1),
            current: snap(2),
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
        assert_eq!(err.code(), ErrorCode::StaleParent);
        assert_eq!(err.current_tip(), Some(snap(2)));
    }

    #[test]
    fn unrelated_is_terminal() {
        let err: RepoError = MergeError::Graph(GraphError::Unrelated { a: snap(1), b: snap(2) }).into();
        assert!(err.is_terminal());
        assert_eq!(err.code().exit_code(), 4);
    }

    #[test]
    fn missing_things_are_not_found() {
        let err: RepoError = GraphError::BranchNotFound("dev".into()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "not found: branch dev");
    }

    #[test]
    fn codes_serialize_screaming() {
        let json = serde_json::to_string(&ErrorCode::ConflictsPending).unwrap();
        assert_eq!(json, r#""CONFLICTS_PENDING""#);
        assert_eq!(ErrorCode::ConflictsPending.to_string(), "CONFLICTS_PENDING");
    }
}
