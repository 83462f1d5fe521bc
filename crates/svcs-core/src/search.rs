//! Label search over a snapshot
//!
//! Scores semantic labels and audio transcripts against a free-text query.
//! A label scores its confidence for every query token it contains; a
//! transcript scores the fraction of query tokens it contains.

use crate::error::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use svcs_chunk::{Aabb, ChunkId, ChunkPayload, PayloadKind};
use svcs_graph::{SnapshotGraph, SnapshotId};

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelHit {
    pub chunk: ChunkId,
    pub layer: PayloadKind,
    pub bounds: Aabb,
    pub score: f32,
    /// Labels or transcript that matched
    pub matched: Vec<String>,
}

/// Search query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelQuery {
    pub text: String,
    /// Maximum hits returned (0 means unlimited)
    #[serde(default)]
    pub limit: usize,
    /// Only chunks introduced by this capture session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl LabelQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    fn tokens(&self) -> Vec<String> {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Best-scoring chunks of `snapshot` for `query`, highest first
///
/// # Errors
/// Returns error if the snapshot or a referenced chunk is missing
pub fn search_labels(
    graph: &SnapshotGraph,
    snapshot: SnapshotId,
    query: &LabelQuery,
) -> Result<Vec<LabelHit>, RepoError> {
    let tokens = query.tokens();
    if tokens.is_empty() {
        return Err(RepoError::InvalidRequest("empty search query".into()));
    }
    let snap = graph.snapshot(&snapshot)?;
    let allowed = match &query.session {
        Some(session) => Some(session_chunks(graph, snapshot, session)?),
        None => None,
    };

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for (region, entry) in snap.index().iter() {
        if !matches!(region.layer, PayloadKind::Semantic | PayloadKind::Audio) {
            continue;
        }
        if !seen.insert(entry.chunk) {
            continue;
        }
        if allowed.as_ref().is_some_and(|set| !set.contains(&entry.chunk)) {
            continue;
        }
        let chunk = graph.store().get(&entry.chunk)?;
        if let Some((score, matched)) = score(chunk.payload(), &tokens) {
            hits.push(LabelHit {
                chunk: entry.chunk,
                layer: region.layer,
                bounds: entry.bounds,
                score,
                matched,
            });
        }
    }

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk.cmp(&b.chunk)));
    if query.limit > 0 {
        hits.truncate(query.limit);
    }
    tracing::debug!(snapshot = %snapshot.short(), query = %query.text, hits = hits.len(), "label search");
    Ok(hits)
}

#[allow(clippy::cast_precision_loss)]
fn score(payload: &ChunkPayload, tokens: &[String]) -> Option<(f32, Vec<String>)> {
    match payload {
        ChunkPayload::Semantic(labels) => {
            let mut total = 0.0;
            let mut matched = Vec::new();
            for (label, confidence) in &labels.labels {
                let lower = label.to_lowercase();
                let hits = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
                if hits > 0 {
                    total += confidence * hits as f32;
                    matched.push(label.clone());
                }
            }
            (total > 0.0).then_some((total, matched))
        }
        ChunkPayload::Audio(audio) => {
            let lower = audio.transcript.to_lowercase();
            let hits = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
            (hits > 0).then(|| (hits as f32 / tokens.len() as f32, vec![audio.transcript.clone()]))
        }
        ChunkPayload::Geometry(_) | ChunkPayload::AgentEdit(_) => None,
    }
}

/// Chunks first introduced by snapshots captured in `session`
fn session_chunks(
    graph: &SnapshotGraph,
    tip: SnapshotId,
    session: &str,
) -> Result<HashSet<ChunkId>, RepoError> {
    let mut out = HashSet::new();
    for id in graph.history(tip)? {
        let snap = graph.snapshot(&id)?;
        if snap.provenance().session_id.as_deref() != Some(session) {
            continue;
        }
        let inherited = match snap.parents().first() {
            Some(parent) => graph.snapshot(parent)?.index().chunk_ids(),
            None => BTreeSet::new(),
        };
        out.extend(snap.index().chunk_ids().difference(&inherited).copied());
    }
    Ok(out)
}
