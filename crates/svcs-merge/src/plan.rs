//! Three-way merge planning
//!
//! Planning only reads the graph: it finds the merge base, diffs both sides
//! against it and sorts every changed region into "take theirs", "already
//! ours" or "conflict".

use crate::conflict::{ConflictRecord, ResolutionState};
use crate::error::MergeError;
use std::sync::Arc;
use svcs_chunk::ChunkId;
use svcs_graph::{Snapshot, SnapshotGraph, SnapshotId};
use svcs_index::{IndexEntry, Region, SpatialIndex};

/// Result of comparing two snapshots against their merge base
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub ours: SnapshotId,
    pub theirs: SnapshotId,
    /// `None` when `theirs` is already contained in `ours`
    pub base: Option<SnapshotId>,
    /// Buckets to copy from `theirs` onto `ours`
    pub changes: Vec<(Region, Option<IndexEntry>)>,
    /// Regions changed on both sides, sorted by region
    pub conflicts: Vec<ConflictRecord>,
    /// Regions both sides changed to the same chunk
    pub convergent: usize,
    pub(crate) ours_snapshot: Arc<Snapshot>,
    pub(crate) theirs_snapshot: Arc<Snapshot>,
    pub(crate) base_snapshot: Option<Arc<Snapshot>>,
}

impl MergePlan {
    /// Compare `ours` and `theirs` through their common ancestor
    ///
    /// # Errors
    /// - [`MergeError::Graph`] if a snapshot is missing or the two are unrelated
    /// - [`MergeError::Index`] if the snapshots use different grids
    pub fn compute(
        graph: &SnapshotGraph,
        ours: SnapshotId,
        theirs: SnapshotId,
    ) -> Result<Self, MergeError> {
        let ours_snapshot = graph.snapshot(&ours)?;
        let theirs_snapshot = graph.snapshot(&theirs)?;

        let mut plan = Self {
            ours,
            theirs,
            base: None,
            changes: Vec::new(),
            conflicts: Vec::new(),
            convergent: 0,
            ours_snapshot,
            theirs_snapshot,
            base_snapshot: None,
        };
        if graph.is_ancestor(theirs, ours) {
            return Ok(plan);
        }

        let base_id = graph.common_ancestor(ours, theirs)?;
        let base = graph.snapshot(&base_id)?;
        let ours_index = plan.ours_snapshot.index();
        let theirs_index = plan.theirs_snapshot.index();
        let changed_ours = SpatialIndex::diff(base.index(), ours_index)?;
        let changed_theirs = SpatialIndex::diff(base.index(), theirs_index)?;

        for region in changed_theirs {
            let their_entry = theirs_index.get(&region).copied();
            if !changed_ours.contains(&region) {
                plan.changes.push((region, their_entry));
                continue;
            }
            let our_entry = ours_index.get(&region);
            if our_entry.map(|e| e.chunk) == their_entry.map(|e| e.chunk) {
                plan.convergent += 1;
                continue;
            }
            plan.conflicts.push(ConflictRecord {
                region,
                base: base.index().get(&region).map(|e| e.chunk),
                ours: our_entry.map(|e| e.chunk),
                theirs: their_entry.map(|e| e.chunk),
                state: ResolutionState::Unresolved,
            });
        }

        plan.base = Some(base_id);
        plan.base_snapshot = Some(base);
        Ok(plan)
    }

    /// Whether merging changes nothing (`theirs` is an ancestor of `ours`)
    #[inline]
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.base.is_none()
    }

    /// Whether `ours` is the merge base, so the target can simply move to `theirs`
    #[inline]
    #[must_use]
    pub fn is_fast_forward(&self) -> bool {
        self.base == Some(self.ours)
    }

    #[inline]
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Conflicted regions, sorted
    #[must_use]
    pub fn conflict_regions(&self) -> Vec<Region> {
        self.conflicts.iter().map(|c| c.region).collect()
    }

    /// Entry placing `chunk` in `region` on any side (ours, theirs, then base)
    pub(crate) fn entry_for(&self, region: &Region, chunk: ChunkId) -> Option<IndexEntry> {
        let sides = [
            Some(&self.ours_snapshot),
            Some(&self.theirs_snapshot),
            self.base_snapshot.as_ref(),
        ];
        sides
            .into_iter()
            .flatten()
            .filter_map(|s| s.index().get(region))
            .find(|e| e.chunk == chunk)
            .copied()
    }

    /// `ours` with every non-conflicting change from `theirs` applied
    pub(crate) fn merged_index(&self) -> SpatialIndex {
        self.ours_snapshot
            .index()
            .overlay(self.changes.iter().copied())
    }
}
