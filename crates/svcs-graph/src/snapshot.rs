//! Snapshots
//!
//! A [`Snapshot`] is an immutable commit: a spatial index plus its parents,
//! provenance and a merkle root over every chunk it references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use svcs_chunk::{ContentHash, ContentMerkleTree, HashError};
use svcs_index::SpatialIndex;

/// Snapshot identifier (hash of the snapshot header)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(ContentHash);

impl SnapshotId {
    #[inline]
    #[must_use]
    pub const fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    #[inline]
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.0
    }

    /// Abbreviated form for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl Display for SnapshotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for SnapshotId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// How a snapshot came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceKind {
    /// The repository root
    Root,
    /// Ingestion session or direct commit
    Capture,
    /// Two-parent merge
    Merge,
    /// Detached capture from outside this repository
    Import,
}

/// Origin of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub kind: ProvenanceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Provenance {
    /// Provenance of a capture by `probe` during `session`
    #[must_use]
    pub fn capture(probe: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            kind: ProvenanceKind::Capture,
            probe_id: Some(probe.into()),
            session_id: Some(session.into()),
        }
    }

    /// Provenance with no probe or session attached
    #[must_use]
    pub const fn of(kind: ProvenanceKind) -> Self {
        Self {
            kind,
            probe_id: None,
            session_id: None,
        }
    }
}

/// Fields an id is computed over
#[derive(Serialize)]
struct Header<'a> {
    parents: &'a [SnapshotId],
    timestamp: &'a DateTime<Utc>,
    provenance: &'a Provenance,
    generation: u64,
    cell_size: f64,
    content_root: &'a ContentHash,
}

/// Immutable commit in the snapshot graph
///
/// # Invariants
/// - `generation` is 0 for parentless snapshots, else 1 + max parent generation
/// - `content_root` commits to exactly `index.chunk_ids()`
#[derive(Debug, Clone)]
pub struct Snapshot {
    id: SnapshotId,
    parents: SmallVec<[SnapshotId; 2]>,
    timestamp: DateTime<Utc>,
    provenance: Provenance,
    generation: u64,
    content_root: ContentHash,
    index: SpatialIndex,
}

impl Snapshot {
    pub(crate) fn new(
        parents: SmallVec<[SnapshotId; 2]>,
        generation: u64,
        provenance: Provenance,
        index: SpatialIndex,
    ) -> Result<Self, HashError> {
        let timestamp = Utc::now();
        let content_root =
            ContentMerkleTree::from_set(index.chunk_ids().iter().map(|id| *id.hash())).root();
        let header = Header {
            parents: &parents,
            timestamp: &timestamp,
            provenance: &provenance,
            generation,
            cell_size: index.cell_size(),
            content_root: &content_root,
        };
        let id = SnapshotId(ContentHash::compute_serializable("svcs.snapshot.v1", &header)?);
        Ok(Self {
            id,
            parents,
            timestamp,
            provenance,
            generation,
            content_root,
            index,
        })
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> SnapshotId {
        self.id
    }

    /// Parents: none for roots and imports, two for merges
    #[inline]
    #[must_use]
    pub fn parents(&self) -> &[SnapshotId] {
        &self.parents
    }

    #[inline]
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Distance from the furthest parentless ancestor
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Merkle root over referenced chunk ids
    #[inline]
    #[must_use]
    pub const fn content_root(&self) -> ContentHash {
        self.content_root
    }

    #[inline]
    #[must_use]
    pub const fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Whether this is a two-parent merge commit
    #[inline]
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Serializable summary
    #[must_use]
    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            id: self.id,
            parents: self.parents.to_vec(),
            timestamp: self.timestamp,
            provenance: self.provenance.clone(),
            generation: self.generation,
            content_root: self.content_root,
            chunk_count: self.index.chunk_ids().len(),
            bucket_count: self.index.len(),
        }
    }
}

/// Snapshot metadata as exposed to dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: SnapshotId,
    pub parents: Vec<SnapshotId>,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub generation: u64,
    pub content_root: ContentHash,
    pub chunk_count: usize,
    pub bucket_count: usize,
}
