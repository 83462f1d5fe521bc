use crate::message::{Channel, SessionId};
use crate::state::SessionState;
use svcs_chunk::{PayloadKind, StoreError};
use svcs_graph::GraphError;
use svcs_merge::MergeError;

/// Errors related to ingestion sessions
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session closed itself after its idle timeout
    #[error("session {0} timed out")]
    SessionTimeout(SessionId),

    #[error("session {0} was aborted")]
    SessionAborted(SessionId),

    /// Session already reached a terminal state
    #[error("session {id} is {state}")]
    SessionClosed { id: SessionId, state: SessionState },

    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("message {seq}: {kind} payload on the {channel} channel")]
    ChannelMismatch {
        seq: u64,
        channel: Channel,
        kind: PayloadKind,
    },

    /// Same sequence number, different content
    #[error("message {seq} conflicts with an earlier message of the same sequence")]
    ConflictingDuplicate { seq: u64 },

    #[error("message {seq} is invalid: {reason}")]
    InvalidMessage { seq: u64, reason: String },

    /// Message addressed to a different session
    #[error("message for session {got} sent to session {expected}")]
    WrongSession { expected: SessionId, got: SessionId },

    /// The branch kept moving while the session tried to commit
    #[error("gave up committing to '{branch}' after {attempts} attempts")]
    RetriesExhausted { branch: String, attempts: u32 },

    /// The pipeline is shutting down
    #[error("ingestion pipeline is shut down")]
    Shutdown,

    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether the message itself was refused while the session stays open
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ChannelMismatch { .. }
                | Self::ConflictingDuplicate { .. }
                | Self::InvalidMessage { .. }
                | Self::WrongSession { .. }
        )
    }
}
