//! Ingestion pipeline
//!
//! Registry of live sessions. Each session runs as its own task; the pipeline
//! routes messages and lifecycle signals to it and remembers how recently
//! closed sessions ended.

use crate::buffer::Buffered;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::message::{SessionId, StreamMessage};
use crate::session::{
    AbortReason, Session, SessionEnd, SessionInfo, SessionInput, SessionOutcome, SessionReport,
};
use crate::state::SessionState;
use dashmap::DashMap;
use moka::sync::Cache;
use std::sync::Arc;
use svcs_graph::SnapshotGraph;
use svcs_merge::MergeEngine;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Closed sessions remembered for late callers
const CLOSED_CAPACITY: u64 = 4096;

const REPORT_CAPACITY: usize = 256;

pub(crate) struct SessionHandle {
    info: SessionInfo,
    sender: mpsc::Sender<SessionInput>,
    state: watch::Receiver<SessionState>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            state: *self.state.borrow(),
            ..self.info.clone()
        }
    }
}

/// State shared by the pipeline and its session tasks
pub(crate) struct Shared {
    pub(crate) graph: Arc<SnapshotGraph>,
    pub(crate) merger: MergeEngine,
    pub(crate) config: IngestConfig,
    pub(crate) sessions: DashMap<SessionId, SessionHandle>,
    pub(crate) closed: Cache<SessionId, SessionEnd>,
    pub(crate) reports: broadcast::Sender<SessionReport>,
}

/// Concurrent ingestion sessions over one repository
pub struct IngestPipeline {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("active", &self.shared.sessions.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    #[must_use]
    pub fn new(graph: Arc<SnapshotGraph>, merger: MergeEngine, config: IngestConfig) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                graph,
                merger,
                config,
                sessions: DashMap::new(),
                closed: Cache::new(CLOSED_CAPACITY),
                reports,
            }),
            shutdown,
        }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &IngestConfig {
        &self.shared.config
    }

    /// Receive a report every time a session terminates
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionReport> {
        self.shared.reports.subscribe()
    }

    /// Open a session against the current tip of `branch`
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`IngestError::Shutdown`] once the pipeline is shutting down
    /// - [`IngestError::Graph`] if the branch does not exist
    pub fn open(&self, branch: &str, probe: impl Into<String>) -> Result<SessionInfo, IngestError> {
        if *self.shutdown.borrow() {
            return Err(IngestError::Shutdown);
        }
        let head = self.shared.graph.branch(branch)?;
        let info = SessionInfo {
            id: SessionId::new(),
            probe: probe.into(),
            branch: head.name,
            opened_tip: head.tip,
            state: SessionState::Opened,
        };

        let (sender, inbox) = mpsc::channel(self.shared.config.channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Opened);
        self.shared.sessions.insert(
            info.id,
            SessionHandle {
                info: info.clone(),
                sender,
                state: state_rx,
                task: None,
            },
        );

        let session = Session::new(info.clone(), state_tx, Arc::clone(&self.shared));
        let task = tokio::spawn(session.run(inbox, self.shutdown.subscribe()));
        if let Some(mut handle) = self.shared.sessions.get_mut(&info.id) {
            handle.task = Some(task);
        }

        tracing::info!(
            session = %info.id,
            branch = %info.branch,
            probe = %info.probe,
            tip = %info.opened_tip.short(),
            "session opened"
        );
        Ok(info)
    }

    /// Route a message to its session
    ///
    /// # Errors
    /// Returns a rejection (see [`IngestError::is_rejection`]) if the message
    /// was refused, or a session error if the session is not open
    pub async fn submit(&self, message: StreamMessage) -> Result<Buffered, IngestError> {
        let id = message.session;
        let sender = self.sender(id)?;
        let (ack, acked) = oneshot::channel();
        sender
            .send(SessionInput::Message { message, ack })
            .await
            .map_err(|_| self.closed_error(id))?;
        acked.await.map_err(|_| self.closed_error(id))?
    }

    /// End a session and commit what it received
    ///
    /// # Errors
    /// Returns a session error if the session is not open, or the commit failure
    pub async fn end(&self, id: SessionId) -> Result<SessionOutcome, IngestError> {
        let sender = self.sender(id)?;
        let (reply, replied) = oneshot::channel();
        sender
            .send(SessionInput::End { reply })
            .await
            .map_err(|_| self.closed_error(id))?;
        replied.await.map_err(|_| self.closed_error(id))?
    }

    /// Abort a session, discarding what it received
    ///
    /// # Errors
    /// Returns a session error if the session is not open
    pub async fn abort(&self, id: SessionId) -> Result<(), IngestError> {
        let sender = self.sender(id)?;
        let (reply, replied) = oneshot::channel();
        sender
            .send(SessionInput::Abort { reply })
            .await
            .map_err(|_| self.closed_error(id))?;
        replied.await.map_err(|_| self.closed_error(id))
    }

    /// Current state of a live or recently closed session
    #[must_use]
    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        if let Some(handle) = self.shared.sessions.get(&id) {
            return Some(*handle.state.borrow());
        }
        self.shared.closed.get(&id).map(|end| match end {
            SessionEnd::Committed(_) => SessionState::Committed,
            SessionEnd::Aborted { .. } => SessionState::Aborted,
        })
    }

    /// How a recently closed session ended
    #[must_use]
    pub fn ended(&self, id: SessionId) -> Option<SessionEnd> {
        self.shared.closed.get(&id)
    }

    #[must_use]
    pub fn info(&self, id: SessionId) -> Option<SessionInfo> {
        self.shared.sessions.get(&id).map(|h| h.info())
    }

    /// Live sessions, oldest first
    #[must_use]
    pub fn active(&self) -> Vec<SessionInfo> {
        let mut out: Vec<_> = self.shared.sessions.iter().map(|h| h.info()).collect();
        out.sort_by_key(|i| i.id);
        out
    }

    /// Abort every live session and wait for their tasks
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let ids: Vec<_> = self.shared.sessions.iter().map(|h| *h.key()).collect();
        tracing::info!(sessions = ids.len(), "ingestion pipeline shutting down");
        for id in ids {
            let task = self
                .shared
                .sessions
                .remove(&id)
                .and_then(|(_, mut handle)| handle.task.take());
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!(session = %id, error = %e, "session task failed");
                }
            }
        }
    }

    fn sender(&self, id: SessionId) -> Result<mpsc::Sender<SessionInput>, IngestError> {
        self.shared
            .sessions
            .get(&id)
            .map(|h| h.sender.clone())
            .ok_or_else(|| self.closed_error(id))
    }

    fn closed_error(&self, id: SessionId) -> IngestError {
        match self.shared.closed.get(&id) {
            Some(SessionEnd::Committed(_)) => IngestError::SessionClosed {
                id,
                state: SessionState::Committed,
            },
            Some(SessionEnd::Aborted { reason: AbortReason::IdleTimeout }) => {
                IngestError::SessionTimeout(id)
            }
            Some(SessionEnd::Aborted { reason: AbortReason::Shutdown }) => IngestError::Shutdown,
            Some(SessionEnd::Aborted { .. }) => IngestError::SessionAborted(id),
            None => IngestError::SessionNotFound(id),
        }
    }
}
