//! Session task
//!
//! Each open session is one tokio task that owns its buffer and reacts to
//! inbound messages, lifecycle signals, its idle timer and pipeline shutdown.
//! Nothing reaches the store or graph until the session commits.

use crate::buffer::{Buffered, SessionBuffer};
use crate::config::IdleAction;
use crate::error::IngestError;
use crate::message::{SessionId, StreamMessage};
use crate::pipeline::Shared;
use crate::state::{validate_transition, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use svcs_graph::{Provenance, SnapshotId};
use svcs_index::SpatialIndex;
use svcs_merge::{ConflictRecord, MergeError, MergeOptions, MergeOutcome};
use tokio::sync::{mpsc, oneshot, watch};

/// Public view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub probe: String,
    pub branch: String,
    /// Branch tip when the session opened; the session snapshot's parent
    pub opened_tip: SnapshotId,
    pub state: SessionState,
}

/// How a session's snapshot reached its branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommitMode {
    /// Nothing was received, so nothing was committed
    Empty,
    /// The branch moved straight to the session snapshot
    FastForward,
    /// The branch had moved on; the session was merged into it
    Merged { merge: SnapshotId },
    /// The merge conflicted, or the branch kept moving past every retry;
    /// the session snapshot waits on its own branch
    Parked {
        branch: String,
        conflicts: Vec<ConflictRecord>,
    },
}

/// Result of a committed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session: SessionId,
    pub branch: String,
    pub opened_tip: SnapshotId,
    /// Snapshot holding exactly this session's chunks
    pub snapshot: Option<SnapshotId>,
    /// Tip of `branch` once the commit settled
    pub tip: SnapshotId,
    pub chunks: usize,
    /// Merge attempts used (1 when nothing raced)
    pub attempts: u32,
    pub mode: CommitMode,
}

impl SessionOutcome {
    #[must_use]
    pub fn conflicts(&self) -> &[ConflictRecord] {
        match &self.mode {
            CommitMode::Parked { conflicts, .. } => conflicts,
            _ => &[],
        }
    }
}

/// Why a session ended without committing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    Requested,
    IdleTimeout,
    Shutdown,
    Failed(String),
}

/// Terminal result of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "end", rename_all = "snake_case")]
pub enum SessionEnd {
    Committed(SessionOutcome),
    Aborted { reason: AbortReason },
}

/// Broadcast when a session terminates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionId,
    pub probe: String,
    pub branch: String,
    pub end: SessionEnd,
}

pub(crate) enum SessionInput {
    Message {
        message: StreamMessage,
        ack: oneshot::Sender<Result<Buffered, IngestError>>,
    },
    End {
        reply: oneshot::Sender<Result<SessionOutcome, IngestError>>,
    },
    Abort {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Session {
    info: SessionInfo,
    state: watch::Sender<SessionState>,
    buffer: SessionBuffer,
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(info: SessionInfo, state: watch::Sender<SessionState>, shared: Arc<Shared>) -> Self {
        Self {
            info,
            state,
            buffer: SessionBuffer::default(),
            shared,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<SessionInput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let idle = self.shared.config.idle_timeout();
        let end = loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => break self.abort(AbortReason::Shutdown),
                received = tokio::time::timeout(idle, inbox.recv()) => received,
            };
            match received {
                Err(_) => {
                    tracing::info!(session = %self.info.id, action = %self.shared.config.idle_action, "session idle");
                    break match self.shared.config.idle_action {
                        IdleAction::Commit => self.finish().await.1,
                        IdleAction::Abort => self.abort(AbortReason::IdleTimeout),
                    };
                }
                // Every handle is gone: the pipeline was dropped
                Ok(None) => break self.abort(AbortReason::Shutdown),
                Ok(Some(SessionInput::Message { message, ack })) => {
                    let _ = ack.send(self.receive(message));
                }
                Ok(Some(SessionInput::End { reply })) => {
                    let (result, end) = self.finish().await;
                    let _ = reply.send(result);
                    break end;
                }
                Ok(Some(SessionInput::Abort { reply })) => {
                    let end = self.abort(AbortReason::Requested);
                    let _ = reply.send(());
                    break end;
                }
            }
        };
        self.close(end);
    }

    fn receive(&mut self, message: StreamMessage) -> Result<Buffered, IngestError> {
        if message.session != self.info.id {
            return Err(IngestError::WrongSession {
                expected: self.info.id,
                got: message.session,
            });
        }
        let (seq, channel) = (message.seq, message.channel);
        self.check_indexable(&message)?;
        let buffered = self.buffer.insert(message)?;
        if self.current() == SessionState::Opened {
            self.transition(SessionState::Receiving);
        }
        tracing::debug!(session = %self.info.id, seq, %channel, ?buffered, "message buffered");
        Ok(buffered)
    }

    /// Refuse a message whose chunk could never enter the index
    fn check_indexable(&self, message: &StreamMessage) -> Result<(), IngestError> {
        let invalid = |reason: String| IngestError::InvalidMessage { seq: message.seq, reason };
        let chunk = message.to_chunk().map_err(|e| invalid(e.to_string()))?;
        SpatialIndex::check_span(&chunk, self.shared.graph.cell_size())
            .map(|_| ())
            .map_err(|e| invalid(e.to_string()))
    }

    async fn finish(&mut self) -> (Result<SessionOutcome, IngestError>, SessionEnd) {
        match self.commit().await {
            Ok(outcome) => {
                self.transition(SessionState::Committed);
                let end = SessionEnd::Committed(outcome.clone());
                (Ok(outcome), end)
            }
            Err(e) => {
                tracing::warn!(session = %self.info.id, error = %e, "session commit failed");
                let end = self.abort(AbortReason::Failed(e.to_string()));
                (Err(e), end)
            }
        }
    }

    async fn commit(&mut self) -> Result<SessionOutcome, IngestError> {
        let graph = Arc::clone(&self.shared.graph);
        let buffer = std::mem::take(&mut self.buffer);
        let mut outcome = SessionOutcome {
            session: self.info.id,
            branch: self.info.branch.clone(),
            opened_tip: self.info.opened_tip,
            snapshot: None,
            tip: self.info.opened_tip,
            chunks: buffer.len(),
            attempts: 0,
            mode: CommitMode::Empty,
        };
        if buffer.is_empty() {
            outcome.tip = graph.branch(&self.info.branch)?.tip;
            return Ok(outcome);
        }

        let chunks = buffer.into_chunks()?;
        let provenance = Provenance::capture(self.info.probe.clone(), self.info.id.to_string());
        let parent = self.info.opened_tip;
        let worker = Arc::clone(&graph);
        let snapshot = tokio::task::spawn_blocking(move || -> Result<SnapshotId, IngestError> {
            // Index first: a batch that cannot be indexed must not reach the store
            let index = worker.child_index(parent, &chunks)?;
            worker.store().put_many(&chunks)?;
            Ok(worker.publish(&[parent], index, provenance)?.id())
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;
        outcome.snapshot = Some(snapshot);

        let attempts = self.shared.config.max_commit_retries.saturating_add(1);
        for attempt in 1..=attempts {
            outcome.attempts = attempt;
            let current = graph.branch(&self.info.branch)?;
            match self.shared.merger.propose(&current, snapshot, &MergeOptions::default()) {
                Ok(MergeOutcome::FastForward { branch } | MergeOutcome::NoOp { branch }) => {
                    outcome.tip = branch.tip;
                    outcome.mode = CommitMode::FastForward;
                }
                Ok(MergeOutcome::Merged { snapshot: merge, branch, .. }) => {
                    outcome.tip = branch.tip;
                    outcome.mode = CommitMode::Merged { merge: merge.id };
                }
                Err(MergeError::ConflictsPending { conflicts, .. }) => {
                    outcome.tip = current.tip;
                    outcome.mode = self.park(snapshot, conflicts)?;
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(session = %self.info.id, attempt, error = %e, "branch moved during commit");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            tracing::info!(
                session = %self.info.id,
                branch = %self.info.branch,
                snapshot = %snapshot.short(),
                tip = %outcome.tip.short(),
                chunks = outcome.chunks,
                "session committed"
            );
            return Ok(outcome);
        }
        // The session snapshot is already published; keep it reachable
        let exhausted = IngestError::RetriesExhausted {
            branch: self.info.branch.clone(),
            attempts,
        };
        tracing::warn!(session = %self.info.id, error = %exhausted, "branch kept moving; parking session");
        outcome.tip = graph.branch(&self.info.branch)?.tip;
        outcome.mode = self.park(snapshot, Vec::new())?;
        Ok(outcome)
    }

    fn park(&self, snapshot: SnapshotId, conflicts: Vec<ConflictRecord>) -> Result<CommitMode, IngestError> {
        let parked = self
            .shared
            .graph
            .create_branch(&self.info.id.parking_branch(), snapshot)?;
        tracing::info!(
            session = %self.info.id,
            parked = %parked.name,
            conflicts = conflicts.len(),
            "session parked"
        );
        Ok(CommitMode::Parked {
            branch: parked.name,
            conflicts,
        })
    }

    fn abort(&mut self, reason: AbortReason) -> SessionEnd {
        let discarded = std::mem::take(&mut self.buffer).len();
        self.transition(SessionState::Aborted);
        tracing::info!(session = %self.info.id, ?reason, discarded, "session aborted");
        SessionEnd::Aborted { reason }
    }

    fn close(self, end: SessionEnd) {
        let counter = match end {
            SessionEnd::Committed(_) => "svcs_sessions_committed_total",
            SessionEnd::Aborted { .. } => "svcs_sessions_aborted_total",
        };
        metrics::counter!(counter).increment(1);

        let id = self.info.id;
        self.shared.closed.insert(id, end.clone());
        self.shared.sessions.remove(&id);
        let _ = self.shared.reports.send(SessionReport {
            session: id,
            probe: self.info.probe,
            branch: self.info.branch,
            end,
        });
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    fn transition(&self, to: SessionState) {
        let from = self.current();
        if let Err(e) = validate_transition(from, to) {
            tracing::warn!(session = %self.info.id, error = %e, "ignored transition");
            return;
        }
        self.state.send_replace(to);
    }
}
