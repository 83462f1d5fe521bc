//! Control channel protocol
//!
//! Dashboards and probes drive the repository with JSON [`ControlRequest`]s
//! and receive one [`ControlResponse`] each. Failures come back as
//! [`ControlResponse::Error`] carrying the stable [`ErrorCode`] plus whatever
//! the caller needs to retry: the current tip or the pending conflicts.

use crate::error::{ErrorCode, RepoError};
use crate::repo::{Repository, ViewportChunk};
use crate::report::ChangeReport;
use crate::search::{LabelHit, LabelQuery};
use serde::{Deserialize, Serialize};
use svcs_chunk::Aabb;
use svcs_graph::{BranchRef, SnapshotId, SnapshotMeta};
use svcs_ingest::{Buffered, SessionId, SessionInfo, SessionOutcome, StreamMessage};
use svcs_merge::{ConflictPolicy, ConflictRecord, MergeOptions, MergeOutcome, Resolution};

/// Requests accepted on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    ListBranches,
    CreateBranch {
        name: String,
        /// Branch name or snapshot id
        from: String,
    },
    DeleteBranch {
        name: String,
    },
    SnapshotMetadata {
        id: SnapshotId,
    },
    History {
        rev: String,
        #[serde(default)]
        limit: usize,
    },
    QueryViewport {
        rev: String,
        viewport: Aabb,
    },
    SearchLabels {
        rev: String,
        query: LabelQuery,
    },
    ChangeReport {
        before: String,
        after: String,
    },
    OpenSession {
        branch: String,
        probe: String,
    },
    Submit {
        message: StreamMessage,
    },
    EndSession {
        session: SessionId,
    },
    AbortSession {
        session: SessionId,
    },
    ProposeMerge {
        target: String,
        source: String,
        #[serde(default)]
        expected: Option<SnapshotId>,
        #[serde(default)]
        policy: Option<ConflictPolicy>,
        #[serde(default)]
        no_fast_forward: bool,
    },
    SubmitResolutions {
        target: String,
        source: String,
        #[serde(default)]
        expected: Option<SnapshotId>,
        resolutions: Vec<Resolution>,
        #[serde(default)]
        policy: Option<ConflictPolicy>,
    },
}

/// Replies on the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlResponse {
    Branches {
        branches: Vec<BranchRef>,
    },
    Branch {
        branch: BranchRef,
    },
    BranchDeleted {
        name: String,
        tip: SnapshotId,
    },
    Snapshot {
        snapshot: SnapshotMeta,
    },
    History {
        snapshots: Vec<SnapshotMeta>,
    },
    Viewport {
        chunks: Vec<ViewportChunk>,
    },
    Search {
        hits: Vec<LabelHit>,
    },
    Changes {
        report: ChangeReport,
    },
    SessionOpened {
        session: SessionInfo,
    },
    Submitted {
        result: Buffered,
    },
    SessionCommitted {
        outcome: SessionOutcome,
    },
    SessionAborted {
        session: SessionId,
    },
    Merge {
        outcome: MergeOutcome,
    },
    Error {
        code: ErrorCode,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_tip: Option<SnapshotId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        conflicts: Vec<ConflictRecord>,
    },
}

impl ControlResponse {
    #[must_use]
    pub fn error(err: &RepoError) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            current_tip: err.current_tip(),
            conflicts: err.conflicts().to_vec(),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

fn merge_options(policy: Option<ConflictPolicy>, no_fast_forward: bool) -> MergeOptions {
    let mut options = MergeOptions {
        policy,
        ..MergeOptions::default()
    };
    if no_fast_forward {
        options = options.no_fast_forward();
    }
    options
}

/// Execute one request against `repo`
pub async fn dispatch(repo: &Repository, request: ControlRequest) -> ControlResponse {
    tracing::debug!(request = ?request, "control request");
    match execute(repo, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(code = %e.code(), error = %e, "control request failed");
            ControlResponse::error(&e)
        }
    }
}

/// Decode a JSON request, execute it and encode the reply
pub async fn dispatch_json(repo: &Repository, request: &str) -> String {
    let response = match serde_json::from_str::<ControlRequest>(request) {
        Ok(request) => dispatch(repo, request).await,
        Err(e) => ControlResponse::error(&RepoError::InvalidRequest(e.to_string())),
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(r#"{{"kind":"error","code":"INTERNAL","message":"{e}","retryable":false}}"#)
    })
}

async fn execute(repo: &Repository, request: ControlRequest) -> Result<ControlResponse, RepoError> {
    Ok(match request {
        ControlRequest::ListBranches => ControlResponse::Branches {
            branches: repo.list_branches(),
        },
        ControlRequest::CreateBranch { name, from } => ControlResponse::Branch {
            branch: repo.create_branch(&name, &from)?,
        },
        ControlRequest::DeleteBranch { name } => {
            let tip = repo.delete_branch(&name)?;
            ControlResponse::BranchDeleted { name, tip }
        }
        ControlRequest::SnapshotMetadata { id } => ControlResponse::Snapshot {
            snapshot: repo.snapshot_metadata(id)?,
        },
        ControlRequest::History { rev, limit } => ControlResponse::History {
            snapshots: repo.history(&rev, limit)?,
        },
        ControlRequest::QueryViewport { rev, viewport } => ControlResponse::Viewport {
            chunks: repo.query_viewport(&rev, &viewport)?,
        },
        ControlRequest::SearchLabels { rev, query } => ControlResponse::Search {
            hits: repo.search_labels(&rev, &query)?,
        },
        ControlRequest::ChangeReport { before, after } => ControlResponse::Changes {
            report: repo.change_report(&before, &after)?,
        },
        ControlRequest::OpenSession { branch, probe } => ControlResponse::SessionOpened {
            session: repo.open_session(&branch, &probe)?,
        },
        ControlRequest::Submit { message } => ControlResponse::Submitted {
            result: repo.submit(message).await?,
        },
        ControlRequest::EndSession { session } => ControlResponse::SessionCommitted {
            outcome: repo.end_session(session).await?,
        },
        ControlRequest::AbortSession { session } => {
            repo.abort_session(session).await?;
            ControlResponse::SessionAborted { session }
        }
        ControlRequest::ProposeMerge {
            target,
            source,
            expected,
            policy,
            no_fast_forward,
        } => ControlResponse::Merge {
            outcome: repo.propose_merge(
                &target,
                &source,
                expected,
                &merge_options(policy, no_fast_forward),
            )?,
        },
        ControlRequest::SubmitResolutions {
            target,
            source,
            expected,
            resolutions,
            policy,
        } => ControlResponse::Merge {
            outcome: repo.submit_resolutions(
                &target,
                &source,
                expected,
                &resolutions,
                &merge_options(policy, false),
            )?,
        },
    })
}
