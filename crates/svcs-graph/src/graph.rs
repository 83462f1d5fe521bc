//! Snapshot graph and branch pointers
//!
//! [`SnapshotGraph`] is an append-only log of immutable snapshots keyed by id,
//! plus a small set of mutable branch cells. Readers clone `Arc<Snapshot>`s
//! and never block writers; a branch cell is the only thing ever mutated, and
//! only through a compare-and-swap against the caller's [`BranchRef`].

use crate::error::GraphError;
use crate::journal::{BranchJournal, BranchOp, JournalEntry};
use crate::snapshot::{Provenance, ProvenanceKind, Snapshot, SnapshotId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeSet, BinaryHeap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use svcs_chunk::{Chunk, ChunkStore};
use svcs_index::SpatialIndex;

/// A caller's view of a branch: its name and the tip they last observed
///
/// Mutations take a `BranchRef` and succeed only if the tip is still current,
/// so a stale view can never silently orphan concurrent work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchRef {
    pub name: String,
    pub tip: SnapshotId,
}

impl Display for BranchRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.tip.short())
    }
}

#[derive(Debug, Clone, Copy)]
struct BranchCell {
    tip: SnapshotId,
}

/// Append-only snapshot DAG with CAS-guarded branches
#[derive(Debug)]
pub struct SnapshotGraph {
    store: Arc<dyn ChunkStore>,
    snapshots: DashMap<SnapshotId, Arc<Snapshot>>,
    branches: DashMap<String, BranchCell>,
    root: SnapshotId,
    default_branch: String,
    cell_size: f64,
    journal: BranchJournal,
}

impl SnapshotGraph {
    /// Create a repository graph with an empty root snapshot and one branch
    ///
    /// # Errors
    /// Returns error if `cell_size` or `default_branch` is invalid
    pub fn new(
        store: Arc<dyn ChunkStore>,
        cell_size: f64,
        default_branch: &str,
    ) -> Result<Self, GraphError> {
        let index = SpatialIndex::new(cell_size)?;
        let root = Snapshot::new(SmallVec::new(), 0, Provenance::of(ProvenanceKind::Root), index)?;
        let graph = Self {
            store,
            snapshots: DashMap::new(),
            branches: DashMap::new(),
            root: root.id(),
            default_branch: default_branch.to_owned(),
            cell_size,
            journal: BranchJournal::default(),
        };
        graph.snapshots.insert(root.id(), Arc::new(root));
        graph.create_branch(default_branch, graph.root)?;
        tracing::info!(root = %graph.root.short(), branch = default_branch, "initialized snapshot graph");
        Ok(graph)
    }

    /// Repository root snapshot
    #[inline]
    #[must_use]
    pub const fn root(&self) -> SnapshotId {
        self.root
    }

    #[inline]
    #[must_use]
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    #[inline]
    #[must_use]
    pub const fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Chunk store every snapshot references into
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    /// Number of snapshots ever published
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Branch movement journal
    #[inline]
    #[must_use]
    pub const fn journal(&self) -> &BranchJournal {
        &self.journal
    }

    /// Journal entries of one branch
    #[must_use]
    pub fn branch_journal(&self, name: &str) -> Vec<JournalEntry> {
        self.journal.for_branch(name)
    }

    /// Check the journal hash chain
    ///
    /// # Errors
    /// Returns [`GraphError::JournalCorrupted`] if any entry was altered
    pub fn verify_journal(&self) -> Result<(), GraphError> {
        self.journal.verify_integrity()
    }

    /// Fetch a snapshot
    ///
    /// # Errors
    /// Returns [`GraphError::SnapshotNotFound`] if absent
    pub fn snapshot(&self, id: &SnapshotId) -> Result<Arc<Snapshot>, GraphError> {
        self.snapshots
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(GraphError::SnapshotNotFound(*id))
    }

    #[must_use]
    pub fn contains(&self, id: &SnapshotId) -> bool {
        self.snapshots.contains_key(id)
    }

    /// Every published snapshot, in unspecified order
    #[must_use]
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.snapshots.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Current view of a branch
    ///
    /// # Errors
    /// Returns [`GraphError::BranchNotFound`] if absent
    pub fn branch(&self, name: &str) -> Result<BranchRef, GraphError> {
        self.branches
            .get(name)
            .map(|cell| BranchRef {
                name: name.to_owned(),
                tip: cell.tip,
            })
            .ok_or_else(|| GraphError::BranchNotFound(name.to_owned()))
    }

    /// All branches, sorted by name
    #[must_use]
    pub fn list_branches(&self) -> Vec<BranchRef> {
        let mut refs: Vec<_> = self
            .branches
            .iter()
            .map(|e| BranchRef {
                name: e.key().clone(),
                tip: e.value().tip,
            })
            .collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }

    /// Create a branch pointing at `from`
    ///
    /// # Errors
    /// - [`GraphError::InvalidBranchName`] for empty or malformed names
    /// - [`GraphError::SnapshotNotFound`] if `from` is absent
    /// - [`GraphError::Unreachable`] if `from` does not descend from the root
    /// - [`GraphError::BranchExists`] if the name is taken
    pub fn create_branch(&self, name: &str, from: SnapshotId) -> Result<BranchRef, GraphError> {
        validate_branch_name(name)?;
        self.snapshot(&from)?;
        if !self.is_ancestor(self.root, from) {
            return Err(GraphError::Unreachable(from));
        }

        match self.branches.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(GraphError::BranchExists(name.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(BranchCell { tip: from });
                self.journal.record(name, BranchOp::Created, None, from);
                tracing::info!(branch = name, tip = %from.short(), "created branch");
                Ok(BranchRef {
                    name: name.to_owned(),
                    tip: from,
                })
            }
        }
    }

    /// Remove a branch pointer; its snapshots stay in the graph
    ///
    /// # Errors
    /// Returns error if the branch is absent or is the default branch
    pub fn delete_branch(&self, name: &str) -> Result<SnapshotId, GraphError> {
        if name == self.default_branch {
            return Err(GraphError::InvalidBranchName(name.to_owned()));
        }
        let (_, cell) = self
            .branches
            .remove(name)
            .ok_or_else(|| GraphError::BranchNotFound(name.to_owned()))?;
        self.journal
            .record(name, BranchOp::Deleted, Some(cell.tip), cell.tip);
        tracing::info!(branch = name, tip = %cell.tip.short(), "deleted branch");
        Ok(cell.tip)
    }

    /// Publish a child of `parent` containing `new_chunks`, without moving any branch
    ///
    /// # Errors
    /// Returns [`GraphError::MissingChunk`] if a chunk has not been stored, or
    /// an index error if a chunk cannot be indexed
    pub fn prepare(
        &self,
        parent: SnapshotId,
        new_chunks: &[Chunk],
        provenance: Provenance,
    ) -> Result<Arc<Snapshot>, GraphError> {
        self.require_chunks(new_chunks)?;
        let index = self.child_index(parent, new_chunks)?;
        self.insert(&[parent], index, provenance)
    }

    /// Index `parent` would have with `new_chunks` applied
    ///
    /// Touches neither the store nor the graph, so callers can validate a
    /// batch before persisting any of it.
    ///
    /// # Errors
    /// Returns error if `parent` is unknown or a chunk cannot be indexed
    pub fn child_index(
        &self,
        parent: SnapshotId,
        new_chunks: &[Chunk],
    ) -> Result<SpatialIndex, GraphError> {
        let parent_snapshot = self.snapshot(&parent)?;
        Ok(SpatialIndex::build(parent_snapshot.index(), new_chunks)?)
    }

    /// Publish a snapshot with an explicit index, without moving any branch
    ///
    /// Used for merges, whose index is assembled from both sides. Every chunk
    /// the index references must already be stored.
    ///
    /// # Errors
    /// Returns error if a parent or chunk is missing or the grid differs
    pub fn publish(
        &self,
        parents: &[SnapshotId],
        index: SpatialIndex,
        provenance: Provenance,
    ) -> Result<Arc<Snapshot>, GraphError> {
        self.verify_references(&index)?;
        self.insert(parents, index, provenance)
    }

    /// Publish a parentless snapshot from outside this repository's history
    ///
    /// Imports are never reachable from the root, so no branch may point at
    /// them and merging them with repository snapshots fails as unrelated.
    ///
    /// # Errors
    /// Returns error if a chunk is missing or cannot be indexed
    pub fn import_root(
        &self,
        chunks: &[Chunk],
        mut provenance: Provenance,
    ) -> Result<Arc<Snapshot>, GraphError> {
        self.require_chunks(chunks)?;
        provenance.kind = ProvenanceKind::Import;
        let index = SpatialIndex::build(&SpatialIndex::new(self.cell_size)?, chunks)?;
        self.insert(&[], index, provenance)
    }

    /// Commit `new_chunks` on top of `branch` and advance it
    ///
    /// # Errors
    /// - [`GraphError::StaleParent`] if `branch.tip` is no longer the tip
    /// - [`GraphError::MissingChunk`] if a chunk has not been stored
    pub fn commit(
        &self,
        branch: &BranchRef,
        new_chunks: &[Chunk],
        provenance: Provenance,
    ) -> Result<Arc<Snapshot>, GraphError> {
        self.ensure_current(branch)?;
        let snapshot = self.prepare(branch.tip, new_chunks, provenance)?;
        self.advance_branch(branch, snapshot.id())?;
        Ok(snapshot)
    }

    /// Fail with `StaleParent` unless `branch.tip` is still the branch's tip
    ///
    /// An early check for work that would otherwise publish snapshots against
    /// an outdated tip; [`advance_branch`](Self::advance_branch) still decides.
    ///
    /// # Errors
    /// - [`GraphError::StaleParent`] carrying the current tip
    /// - [`GraphError::BranchNotFound`] if the branch is gone
    pub fn ensure_current(&self, branch: &BranchRef) -> Result<(), GraphError> {
        let current = self.branch(&branch.name)?.tip;
        if current != branch.tip {
            metrics::counter!("svcs_branch_cas_failures_total").increment(1);
            return Err(GraphError::StaleParent {
                branch: branch.name.clone(),
                expected: branch.tip,
                current,
            });
        }
        Ok(())
    }

    /// Move `branch` from its observed tip to `new`
    ///
    /// Atomic with respect to other advances of the same branch: of two
    /// callers holding the same `BranchRef`, exactly one succeeds.
    ///
    /// # Errors
    /// - [`GraphError::StaleParent`] if the tip moved since `branch` was read
    /// - [`GraphError::NonLinearHistory`] if `new` does not descend from the tip
    pub fn advance_branch(&self, branch: &BranchRef, new: SnapshotId) -> Result<BranchRef, GraphError> {
        self.snapshot(&new)?;
        let descends = self.is_ancestor(branch.tip, new);

        let mut cell = self
            .branches
            .get_mut(&branch.name)
            .ok_or_else(|| GraphError::BranchNotFound(branch.name.clone()))?;
        let current = cell.tip;
        if current != branch.tip {
            drop(cell);
            metrics::counter!("svcs_branch_cas_failures_total").increment(1);
            tracing::debug!(branch = %branch.name, expected = %branch.tip.short(), current = %current.short(), "stale branch advance");
            return Err(GraphError::StaleParent {
                branch: branch.name.clone(),
                expected: branch.tip,
                current,
            });
        }
        if !descends {
            return Err(GraphError::NonLinearHistory {
                branch: branch.name.clone(),
                tip: current,
                proposed: new,
            });
        }
        cell.tip = new;
        self.journal
            .record(&branch.name, BranchOp::Advanced, Some(current), new);
        drop(cell);

        tracing::info!(branch = %branch.name, from = %current.short(), to = %new.short(), "advanced branch");
        Ok(BranchRef {
            name: branch.name.clone(),
            tip: new,
        })
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors
    #[must_use]
    pub fn is_ancestor(&self, ancestor: SnapshotId, descendant: SnapshotId) -> bool {
        let Ok(target) = self.snapshot(&ancestor) else {
            return false;
        };
        let floor = target.generation();
        let mut stack = vec![descendant];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            let Ok(snapshot) = self.snapshot(&id) else {
                continue;
            };
            // Generations strictly decrease along parent edges
            if snapshot.generation() > floor {
                stack.extend(snapshot.parents().iter().copied());
            }
        }
        false
    }

    /// `id` and all of its ancestors
    ///
    /// # Errors
    /// Returns [`GraphError::SnapshotNotFound`] if `id` is absent
    pub fn ancestors(&self, id: SnapshotId) -> Result<HashSet<SnapshotId>, GraphError> {
        self.snapshot(&id)?;
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.snapshot(&next)?.parents().iter().copied());
            }
        }
        Ok(seen)
    }

    /// Lowest common ancestor of `a` and `b`
    ///
    /// Among all common ancestors, the one with the highest generation wins;
    /// ties go to the greater id so the answer is deterministic.
    ///
    /// # Errors
    /// Returns [`GraphError::Unrelated`] if the two share no history
    pub fn common_ancestor(&self, a: SnapshotId, b: SnapshotId) -> Result<SnapshotId, GraphError> {
        let of_a = self.ancestors(a)?;
        let start = self.snapshot(&b)?;

        let mut heap = BinaryHeap::from([(start.generation(), b)]);
        let mut seen = HashSet::from([b]);
        while let Some((_, id)) = heap.pop() {
            if of_a.contains(&id) {
                return Ok(id);
            }
            for parent in self.snapshot(&id)?.parents() {
                if seen.insert(*parent) {
                    heap.push((self.snapshot(parent)?.generation(), *parent));
                }
            }
        }
        Err(GraphError::Unrelated { a, b })
    }

    /// Ancestry of `tip` in topological order, oldest first
    ///
    /// # Errors
    /// Returns error if `tip` is absent or the ancestry contains a cycle
    pub fn history(&self, tip: SnapshotId) -> Result<Vec<SnapshotId>, GraphError> {
        let ancestry: BTreeSet<_> = self.ancestors(tip)?.into_iter().collect();
        let mut dag = DiGraphMap::<SnapshotId, ()>::with_capacity(ancestry.len(), ancestry.len());
        for id in &ancestry {
            dag.add_node(*id);
        }
        for id in &ancestry {
            for parent in self.snapshot(id)?.parents() {
                dag.add_edge(*parent, *id, ());
            }
        }
        toposort(&dag, None).map_err(|cycle| GraphError::CycleDetected(cycle.node_id()))
    }

    /// Confirm every chunk an index references is stored
    ///
    /// # Errors
    /// Returns [`GraphError::MissingChunk`] for the first absent chunk
    pub fn verify_references(&self, index: &SpatialIndex) -> Result<(), GraphError> {
        match index.chunk_ids().into_iter().find(|id| !self.store.exists(id)) {
            Some(missing) => Err(GraphError::MissingChunk(missing)),
            None => Ok(()),
        }
    }

    fn require_chunks(&self, chunks: &[Chunk]) -> Result<(), GraphError> {
        match chunks.iter().find(|c| !self.store.exists(&c.id())) {
            Some(missing) => Err(GraphError::MissingChunk(missing.id())),
            None => Ok(()),
        }
    }

    fn insert(
        &self,
        parents: &[SnapshotId],
        index: SpatialIndex,
        provenance: Provenance,
    ) -> Result<Arc<Snapshot>, GraphError> {
        let distinct = match parents {
            [a, b] => a != b,
            _ => parents.len() <= 2,
        };
        if !distinct {
            return Err(GraphError::InvalidParents(parents.len()));
        }
        if index.cell_size().to_bits() != self.cell_size.to_bits() {
            return Err(svcs_index::IndexError::CellSizeMismatch {
                left: self.cell_size,
                right: index.cell_size(),
            }
            .into());
        }

        let mut generation = 0;
        for parent in parents {
            generation = generation.max(self.snapshot(parent)?.generation() + 1);
        }
        let snapshot = Arc::new(Snapshot::new(
            parents.iter().copied().collect(),
            generation,
            provenance,
            index,
        )?);
        self.snapshots.insert(snapshot.id(), Arc::clone(&snapshot));
        tracing::debug!(
            snapshot = %snapshot.id().short(),
            generation,
            parents = parents.len(),
            buckets = snapshot.index().len(),
            "published snapshot"
        );
        Ok(snapshot)
    }
}

fn validate_branch_name(name: &str) -> Result<(), GraphError> {
    let malformed = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains("//")
        || name.contains("..")
        || name.chars().any(|c| c.is_whitespace() || c.is_control());
    if malformed {
        Err(GraphError::InvalidBranchName(name.to_owned()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcs_chunk::{Aabb, ChunkPayload, MemoryChunkStore, Point3, SemanticLabels};

    fn graph() -> SnapshotGraph {
        SnapshotGraph::new(Arc::new(MemoryChunkStore::new()), 1.0, "main").unwrap()
    }

    fn stored(graph: &SnapshotGraph, label: &str) -> Chunk {
        let chunk = Chunk::new(
            Aabb::cube(Point3::new(0.5, 0.5, 0.5), 1.0).unwrap(),
            ChunkPayload::Semantic(SemanticLabels::single(label, 0.5)),
            0,
        )
        .unwrap();
        graph.store().put(&chunk).unwrap();
        chunk
    }

    #[test]
    fn new_graph_has_root_and_default_branch() {
        let graph = graph();
        let main = graph.branch("main").unwrap();
        assert_eq!(main.tip, graph.root());
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.history(graph.root()).unwrap(), vec![graph.root()]);
    }

    #[test]
    fn branch_names_are_validated() {
        let graph = graph();
        for bad in ["", "a b", "/x", "x/", "a//b", "a..b"] {
            assert!(matches!(
                graph.create_branch(bad, graph.root()),
                Err(GraphError::InvalidBranchName(_))
            ));
        }
        assert!(graph.create_branch("sessions/01ABC", graph.root()).is_ok());
        assert!(matches!(
            graph.create_branch("main", graph.root()),
            Err(GraphError::BranchExists(_))
        ));
    }

    #[test]
    fn commit_requires_stored_chunks() {
        let graph = graph();
        let main = graph.branch("main").unwrap();
        let orphan = Chunk::new(
            Aabb::cube(Point3::new(0.0, 0.0, 0.0), 1.0).unwrap(),
            ChunkPayload::Semantic(SemanticLabels::single("ghost", 0.5)),
            0,
        )
        .unwrap();
        assert!(matches!(
            graph.commit(&main, &[orphan], Provenance::of(ProvenanceKind::Capture)),
            Err(GraphError::MissingChunk(_))
        ));
        assert_eq!(graph.branch("main").unwrap().tip, main.tip);
    }

    #[test]
    fn advance_rejects_non_descendant() {
        let graph = graph();
        let main = graph.branch("main").unwrap();
        let chunk = stored(&graph, "a");
        let s1 = graph.commit(&main, &[chunk], Provenance::of(ProvenanceKind::Capture)).unwrap();
        let main = graph.branch("main").unwrap();
        assert_eq!(main.tip, s1.id());

        // Going back to the root is not a fast-forward
        assert!(matches!(
            graph.advance_branch(&main, graph.root()),
            Err(GraphError::NonLinearHistory { .. })
        ));
    }

    #[test]
    fn default_branch_cannot_be_deleted() {
        let graph = graph();
        assert!(graph.delete_branch("main").is_err());
        graph.create_branch("tmp", graph.root()).unwrap();
        assert_eq!(graph.delete_branch("tmp").unwrap(), graph.root());
        assert!(graph.branch("tmp").is_err());
        assert!(graph.verify_journal().is_ok());
    }

    #[test]
    fn import_is_unrelated_and_unbranchable() {
        let graph = graph();
        let chunk = stored(&graph, "foreign");
        let import = graph
            .import_root(&[chunk], Provenance::of(ProvenanceKind::Capture))
            .unwrap();
        assert_eq!(import.provenance().kind, ProvenanceKind::Import);
        assert!(matches!(
            graph.create_branch("foreign", import.id()),
            Err(GraphError::Unreachable(_))
        ));
        assert!(matches!(
            graph.common_ancestor(graph.root(), import.id()),
            Err(GraphError::Unrelated { .. })
        ));
    }

    #[test]
    fn publish_rejects_identical_parents() {
        let graph = graph();
        let index = graph.snapshot(&graph.root()).unwrap().index().clone();
        assert!(matches!(
            graph.publish(&[graph.root(), graph.root()], index, Provenance::of(ProvenanceKind::Merge)),
            Err(GraphError::InvalidParents(2))
        ));
    }
}
