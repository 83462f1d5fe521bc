//! Repository events for dashboards

use serde::{Deserialize, Serialize};
use svcs_graph::SnapshotId;
use svcs_index::Region;
use svcs_ingest::{AbortReason, CommitMode, SessionEnd, SessionId, SessionInfo, SessionReport};

/// Something dashboards may want to redraw for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepoEvent {
    SessionOpened {
        session: SessionInfo,
    },
    /// A snapshot was published and is reachable from `branch`
    SnapshotCommitted {
        branch: String,
        snapshot: SnapshotId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<SessionId>,
    },
    BranchAdvanced {
        branch: String,
        tip: SnapshotId,
    },
    /// A merge stopped on unresolved regions
    MergeConflicts {
        target: String,
        source: String,
        regions: Vec<Region>,
    },
    SessionAborted {
        session: SessionId,
        reason: AbortReason,
    },
}

impl RepoEvent {
    /// Events describing a session's end
    #[must_use]
    pub fn from_report(report: &SessionReport) -> Vec<Self> {
        let outcome = match &report.end {
            SessionEnd::Aborted { reason } => {
                return vec![Self::SessionAborted {
                    session: report.session,
                    reason: reason.clone(),
                }]
            }
            SessionEnd::Committed(outcome) => outcome,
        };
        let Some(snapshot) = outcome.snapshot else {
            return Vec::new();
        };
        match &outcome.mode {
            CommitMode::Parked { branch, conflicts } => {
                let mut events = vec![Self::SnapshotCommitted {
                    branch: branch.clone(),
                    snapshot,
                    session: Some(report.session),
                }];
                if !conflicts.is_empty() {
                    events.push(Self::MergeConflicts {
                        target: report.branch.clone(),
                        source: branch.clone(),
                        regions: conflicts.iter().map(|c| c.region).collect(),
                    });
                }
                events
            }
            CommitMode::Empty => Vec::new(),
            CommitMode::FastForward | CommitMode::Merged { .. } => vec![
                Self::SnapshotCommitted {
                    branch: report.branch.clone(),
                    snapshot,
                    session: Some(report.session),
                },
                Self::BranchAdvanced {
                    branch: report.branch.clone(),
                    tip: outcome.tip,
                },
            ],
        }
    }
}
