//! Repository facade
//!
//! [`Repository`] wires a chunk store, snapshot graph, merge engine and
//! ingestion pipeline together from one [`RepoConfig`], and is the single
//! entry point for queries, capture sessions and merges.

use crate::config::{RepoConfig, StorageBackend};
use crate::error::RepoError;
use crate::events::RepoEvent;
use crate::report::{self, ChangeReport};
use crate::search::{self, LabelHit, LabelQuery};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use svcs_chunk::{Aabb, ChunkId, ChunkPayload, ChunkStore, FsChunkStore, MemoryChunkStore, PayloadKind};
use svcs_graph::{BranchRef, SnapshotGraph, SnapshotId, SnapshotMeta};
use svcs_ingest::{
    Buffered, IngestPipeline, SessionId, SessionInfo, SessionOutcome, SessionReport, SessionState,
    StreamMessage,
};
use svcs_merge::{MergeEngine, MergeError, MergeOptions, MergeOutcome, Resolution};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// One chunk visible in a viewport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportChunk {
    pub chunk: ChunkId,
    pub layer: PayloadKind,
    pub bounds: Aabb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A spatial repository
pub struct Repository {
    config: RepoConfig,
    graph: Arc<SnapshotGraph>,
    merger: MergeEngine,
    ingest: IngestPipeline,
    events: broadcast::Sender<RepoEvent>,
    /// Report subscription, handed to the forwarding task on first use
    reports: Mutex<Option<broadcast::Receiver<SessionReport>>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("default_branch", &self.config.default_branch)
            .field("snapshots", &self.graph.len())
            .field("ingest", &self.ingest)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Open a repository with the configured storage backend
    ///
    /// The snapshot graph always starts from a fresh root; a filesystem
    /// backend keeps previously stored chunks available for deduplication.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the store cannot be opened
    pub fn open(config: RepoConfig) -> Result<Self, RepoError> {
        config.validate()?;
        let store: Arc<dyn ChunkStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryChunkStore::new()),
            StorageBackend::Filesystem => {
                let path = config.storage.path.as_ref().ok_or_else(|| {
                    RepoError::InvalidRequest("filesystem backend requires a path".into())
                })?;
                Arc::new(FsChunkStore::open(path, config.storage.cache_capacity)?)
            }
        };
        Self::with_store(config, store)
    }

    /// Open a repository over an existing chunk store
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn with_store(config: RepoConfig, store: Arc<dyn ChunkStore>) -> Result<Self, RepoError> {
        config.validate()?;
        let graph = Arc::new(SnapshotGraph::new(
            store,
            config.index.cell_size,
            &config.default_branch,
        )?);
        let merger = MergeEngine::with_policy(Arc::clone(&graph), config.merge.policy);
        let ingest = IngestPipeline::new(Arc::clone(&graph), merger.clone(), config.ingest.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let reports = Mutex::new(Some(ingest.subscribe()));
        tracing::info!(
            backend = ?config.storage.backend,
            cell_size = config.index.cell_size,
            policy = %config.merge.policy,
            "repository opened"
        );
        Ok(Self {
            config,
            graph,
            merger,
            ingest,
            events,
            reports,
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RepoConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn graph(&self) -> &Arc<SnapshotGraph> {
        &self.graph
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        self.graph.store()
    }

    #[inline]
    #[must_use]
    pub const fn merger(&self) -> &MergeEngine {
        &self.merger
    }

    #[inline]
    #[must_use]
    pub const fn ingest(&self) -> &IngestPipeline {
        &self.ingest
    }

    /// Receive every repository event from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RepoEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RepoEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Resolve a branch name or full snapshot id to a snapshot
    ///
    /// # Errors
    /// Returns [`RepoError::NotFound`] if neither matches
    pub fn resolve(&self, rev: &str) -> Result<SnapshotId, RepoError> {
        if let Ok(head) = self.graph.branch(rev) {
            return Ok(head.tip);
        }
        match rev.parse::<SnapshotId>() {
            Ok(id) if self.graph.contains(&id) => Ok(id),
            _ => Err(RepoError::NotFound(format!("revision {rev}"))),
        }
    }

    // ---- Queries ----

    #[must_use]
    pub fn list_branches(&self) -> Vec<BranchRef> {
        self.graph.list_branches()
    }

    /// # Errors
    /// Returns [`RepoError::NotFound`] for an unknown branch
    pub fn branch(&self, name: &str) -> Result<BranchRef, RepoError> {
        Ok(self.graph.branch(name)?)
    }

    /// Create `name` at the snapshot `from` resolves to
    ///
    /// # Errors
    /// Returns error if `from` is unknown or `name` is taken or malformed
    pub fn create_branch(&self, name: &str, from: &str) -> Result<BranchRef, RepoError> {
        let tip = self.resolve(from)?;
        Ok(self.graph.create_branch(name, tip)?)
    }

    /// Remove a branch pointer, returning its last tip
    ///
    /// # Errors
    /// Returns error if the branch is unknown or is the default branch
    pub fn delete_branch(&self, name: &str) -> Result<SnapshotId, RepoError> {
        Ok(self.graph.delete_branch(name)?)
    }

    /// # Errors
    /// Returns [`RepoError::NotFound`] for an unknown snapshot
    pub fn snapshot_metadata(&self, id: SnapshotId) -> Result<SnapshotMeta, RepoError> {
        Ok(self.graph.snapshot(&id)?.meta())
    }

    /// Ancestry of `rev`, newest first, at most `limit` entries (0 for all)
    ///
    /// # Errors
    /// Returns error if `rev` does not resolve
    pub fn history(&self, rev: &str, limit: usize) -> Result<Vec<SnapshotMeta>, RepoError> {
        let tip = self.resolve(rev)?;
        let mut ids = self.graph.history(tip)?;
        ids.reverse();
        if limit > 0 {
            ids.truncate(limit);
        }
        ids.iter()
            .map(|id| Ok(self.graph.snapshot(id)?.meta()))
            .collect()
    }

    /// Chunks of `rev` whose bounds intersect `viewport`, one entry per chunk
    ///
    /// # Errors
    /// Returns error if `rev` does not resolve or a chunk is missing
    pub fn query_viewport(&self, rev: &str, viewport: &Aabb) -> Result<Vec<ViewportChunk>, RepoError> {
        let snapshot = self.graph.snapshot(&self.resolve(rev)?)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (region, entry) in snapshot.index().query_entries(viewport) {
            if !seen.insert(entry.chunk) {
                continue;
            }
            let chunk = self.store().get(&entry.chunk)?;
            out.push(ViewportChunk {
                chunk: entry.chunk,
                layer: region.layer,
                bounds: entry.bounds,
                label: label_of(chunk.payload()),
            });
        }
        tracing::debug!(snapshot = %snapshot.id().short(), chunks = out.len(), "viewport query");
        Ok(out)
    }

    /// # Errors
    /// Returns error if `rev` does not resolve or the query is empty
    pub fn search_labels(&self, rev: &str, query: &LabelQuery) -> Result<Vec<LabelHit>, RepoError> {
        search::search_labels(&self.graph, self.resolve(rev)?, query)
    }

    /// # Errors
    /// Returns error if either revision does not resolve
    pub fn change_report(&self, before: &str, after: &str) -> Result<ChangeReport, RepoError> {
        report::change_report(&self.graph, self.resolve(before)?, self.resolve(after)?)
    }

    // ---- Sessions ----

    /// Open a capture session against the current tip of `branch`
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if the branch is unknown or the repository is shutting down
    pub fn open_session(&self, branch: &str, probe: &str) -> Result<SessionInfo, RepoError> {
        self.start_forwarding();
        let info = self.ingest.open(branch, probe)?;
        self.emit(RepoEvent::SessionOpened {
            session: info.clone(),
        });
        Ok(info)
    }

    /// # Errors
    /// Returns error if the session is not open or the message was rejected
    pub async fn submit(&self, message: StreamMessage) -> Result<Buffered, RepoError> {
        Ok(self.ingest.submit(message).await?)
    }

    /// # Errors
    /// Returns error if the session is not open or its commit failed
    pub async fn end_session(&self, id: SessionId) -> Result<SessionOutcome, RepoError> {
        Ok(self.ingest.end(id).await?)
    }

    /// # Errors
    /// Returns error if the session is not open
    pub async fn abort_session(&self, id: SessionId) -> Result<(), RepoError> {
        Ok(self.ingest.abort(id).await?)
    }

    #[must_use]
    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.ingest.state(id)
    }

    /// Turn session reports into repository events
    fn start_forwarding(&self) {
        let Some(mut reports) = self.reports.lock().take() else {
            return;
        };
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match reports.recv().await {
                    Ok(report) => {
                        for event in RepoEvent::from_report(&report) {
                            let _ = events.send(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event forwarder lagged behind session reports");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    // ---- Merges ----

    /// Merge branch `source` into branch `target`
    ///
    /// `expected` pins the target tip the caller last saw; a moved target then
    /// fails with `StaleParent` instead of merging into unseen work.
    ///
    /// # Errors
    /// - [`RepoError::ConflictsPending`] with the conflict records
    /// - [`RepoError::StaleParent`] if `expected` is no longer the tip
    /// - [`RepoError::Unrelated`] if the branches share no history
    pub fn propose_merge(
        &self,
        target: &str,
        source: &str,
        expected: Option<SnapshotId>,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, RepoError> {
        self.submit_resolutions(target, source, expected, &[], options)
    }

    /// Resubmit a merge with explicit conflict resolutions
    ///
    /// # Errors
    /// As [`Repository::propose_merge`], plus [`RepoError::InvalidRequest`]
    /// for resolutions that do not match a conflict
    pub fn submit_resolutions(
        &self,
        target: &str,
        source: &str,
        expected: Option<SnapshotId>,
        resolutions: &[Resolution],
        options: &MergeOptions,
    ) -> Result<MergeOutcome, RepoError> {
        let mut head = self.graph.branch(target)?;
        if let Some(tip) = expected {
            head.tip = tip;
        }
        let theirs = self.resolve(source)?;
        let result = if resolutions.is_empty() {
            self.merger.propose(&head, theirs, options)
        } else {
            self.merger.resolve(&head, theirs, resolutions, options)
        };
        match result {
            Ok(outcome) => {
                self.announce(&outcome);
                Ok(outcome)
            }
            Err(MergeError::ConflictsPending { conflicts, base, ours, theirs: t }) => {
                self.emit(RepoEvent::MergeConflicts {
                    target: target.to_owned(),
                    source: source.to_owned(),
                    regions: conflicts.iter().map(|c| c.region).collect(),
                });
                Err(RepoError::ConflictsPending {
                    base,
                    ours,
                    theirs: t,
                    conflicts,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn announce(&self, outcome: &MergeOutcome) {
        match outcome {
            MergeOutcome::NoOp { .. } => {}
            MergeOutcome::FastForward { branch } => self.emit(RepoEvent::BranchAdvanced {
                branch: branch.name.clone(),
                tip: branch.tip,
            }),
            MergeOutcome::Merged { snapshot, branch, .. } => {
                self.emit(RepoEvent::SnapshotCommitted {
                    branch: branch.name.clone(),
                    snapshot: snapshot.id,
                    session: None,
                });
                self.emit(RepoEvent::BranchAdvanced {
                    branch: branch.name.clone(),
                    tip: branch.tip,
                });
            }
        }
    }

    /// Abort live sessions and stop accepting new ones
    pub async fn shutdown(&self) {
        self.ingest.shutdown().await;
        tracing::info!("repository shut down");
    }
}

fn label_of(payload: &ChunkPayload) -> Option<String> {
    match payload {
        ChunkPayload::Semantic(labels) => labels.primary().map(str::to_owned),
        ChunkPayload::Audio(audio) => Some(audio.transcript.clone()),
        ChunkPayload::Geometry(_) | ChunkPayload::AgentEdit(_) => None,
    }
}
