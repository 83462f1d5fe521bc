//! Merge engine
//!
//! [`MergeEngine`] turns a [`MergePlan`] into a two-parent snapshot and
//! advances the target branch with the graph's compare-and-swap. Everything
//! before that final step is read-only, so a request that ends in
//! `ConflictsPending` leaves the store and graph untouched.

use crate::conflict::{ConflictRecord, Resolution, ResolutionChoice, ResolutionState};
use crate::error::MergeError;
use crate::plan::MergePlan;
use crate::policy::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use svcs_chunk::Chunk;
use svcs_graph::{BranchRef, Provenance, ProvenanceKind, SnapshotGraph, SnapshotId, SnapshotMeta};
use svcs_index::{IndexEntry, Region};

/// Per-request merge options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Overrides the engine's policy for this request
    pub policy: Option<ConflictPolicy>,
    /// Move the target directly when it has no changes of its own
    pub fast_forward: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            policy: None,
            fast_forward: true,
        }
    }
}

impl MergeOptions {
    #[must_use]
    pub const fn with_policy(policy: ConflictPolicy) -> Self {
        Self {
            policy: Some(policy),
            fast_forward: true,
        }
    }

    /// Always record a merge commit
    #[must_use]
    pub const fn no_fast_forward(mut self) -> Self {
        self.fast_forward = false;
        self
    }
}

/// Successful merge result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Source was already contained in the target
    NoOp { branch: BranchRef },
    /// Target moved to the source snapshot
    FastForward { branch: BranchRef },
    /// A merge snapshot was committed
    Merged {
        snapshot: SnapshotMeta,
        branch: BranchRef,
        /// Conflicts settled by policy or resolution
        resolved: Vec<ConflictRecord>,
    },
}

impl MergeOutcome {
    /// Branch state after the merge
    #[must_use]
    pub const fn branch(&self) -> &BranchRef {
        match self {
            Self::NoOp { branch } | Self::FastForward { branch } | Self::Merged { branch, .. } => {
                branch
            }
        }
    }

    #[must_use]
    pub const fn tip(&self) -> SnapshotId {
        self.branch().tip
    }
}

/// Three-way merges over a shared snapshot graph
#[derive(Debug, Clone)]
pub struct MergeEngine {
    graph: Arc<SnapshotGraph>,
    policy: ConflictPolicy,
}

impl MergeEngine {
    /// Engine with the `Manual` policy
    #[must_use]
    pub fn new(graph: Arc<SnapshotGraph>) -> Self {
        Self::with_policy(graph, ConflictPolicy::default())
    }

    #[must_use]
    pub const fn with_policy(graph: Arc<SnapshotGraph>, policy: ConflictPolicy) -> Self {
        Self { graph, policy }
    }

    #[inline]
    #[must_use]
    pub const fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    #[inline]
    #[must_use]
    pub const fn graph(&self) -> &Arc<SnapshotGraph> {
        &self.graph
    }

    /// Read-only comparison of two snapshots
    ///
    /// # Errors
    /// Returns error if a snapshot is missing or the two share no history
    pub fn plan(&self, ours: SnapshotId, theirs: SnapshotId) -> Result<MergePlan, MergeError> {
        MergePlan::compute(&self.graph, ours, theirs)
    }

    /// Merge `source` into `target`, resolving conflicts by policy only
    ///
    /// # Errors
    /// - [`MergeError::ConflictsPending`] if the policy leaves conflicts open
    /// - [`MergeError::Graph`] with `StaleParent` if `target` moved meanwhile
    pub fn propose(
        &self,
        target: &BranchRef,
        source: SnapshotId,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, MergeError> {
        self.merge(target, source, &[], options)
    }

    /// Resubmit a merge with explicit resolutions
    ///
    /// Conflicts without a resolution fall back to the policy; any still
    /// undecided keep the request pending.
    ///
    /// # Errors
    /// - [`MergeError::UnknownRegion`] for a resolution outside the conflict set
    /// - [`MergeError::InvalidResolution`] for a choice that cannot fill its region
    /// - [`MergeError::ConflictsPending`] if conflicts remain
    pub fn resolve(
        &self,
        target: &BranchRef,
        source: SnapshotId,
        resolutions: &[Resolution],
        options: &MergeOptions,
    ) -> Result<MergeOutcome, MergeError> {
        self.merge(target, source, resolutions, options)
    }

    fn merge(
        &self,
        target: &BranchRef,
        source: SnapshotId,
        resolutions: &[Resolution],
        options: &MergeOptions,
    ) -> Result<MergeOutcome, MergeError> {
        self.graph.ensure_current(target)?;
        let plan = self.plan(target.tip, source)?;
        let submitted = index_resolutions(&plan, resolutions)?;

        let Some(base) = plan.base else {
            tracing::debug!(branch = %target.name, source = %source.short(), "merge is a no-op");
            return Ok(MergeOutcome::NoOp {
                branch: target.clone(),
            });
        };

        if plan.is_fast_forward() && options.fast_forward {
            let branch = self.graph.advance_branch(target, source)?;
            metrics::counter!("svcs_merges_total").increment(1);
            tracing::info!(branch = %branch.name, tip = %source.short(), "fast-forward merge");
            return Ok(MergeOutcome::FastForward { branch });
        }

        let policy = options.policy.unwrap_or(self.policy);
        let mut records = plan.conflicts.clone();
        let mut decided = Vec::with_capacity(records.len());
        for record in &mut records {
            if let Some(choice) = submitted.get(&record.region) {
                record.state = ResolutionState::ManuallyResolved;
                decided.push((record.clone(), (*choice).clone()));
            } else if let Some(choice) = policy.decide(record) {
                record.state = ResolutionState::AutoResolved;
                decided.push((record.clone(), choice));
            }
        }

        let pending: Vec<_> = records.iter().filter(|r| !r.is_resolved()).cloned().collect();
        if !pending.is_empty() {
            metrics::counter!("svcs_merge_conflicts_total").increment(pending.len() as u64);
            tracing::info!(
                branch = %target.name,
                source = %source.short(),
                pending = pending.len(),
                "merge has unresolved conflicts"
            );
            return Err(MergeError::ConflictsPending {
                base,
                ours: target.tip,
                theirs: source,
                conflicts: pending,
            });
        }

        let mut index = plan.merged_index();
        let (grafts, authored) = self.apply_choices(&plan, &decided, index.high_water())?;
        if !authored.is_empty() {
            self.graph.store().put_many(&authored)?;
        }
        index = index.overlay(grafts);

        let snapshot = self.graph.publish(
            &[target.tip, source],
            index,
            Provenance::of(ProvenanceKind::Merge),
        )?;
        let branch = self.graph.advance_branch(target, snapshot.id())?;

        metrics::counter!("svcs_merges_total").increment(1);
        tracing::info!(
            branch = %branch.name,
            snapshot = %snapshot.id().short(),
            base = %base.short(),
            carried = plan.changes.len(),
            resolved = decided.len(),
            "merged"
        );
        Ok(MergeOutcome::Merged {
            snapshot: snapshot.meta(),
            branch,
            resolved: records,
        })
    }

    /// Index changes for each decided conflict, plus chunks that must be stored
    fn apply_choices(
        &self,
        plan: &MergePlan,
        decided: &[(ConflictRecord, ResolutionChoice)],
        mut seq: u64,
    ) -> Result<(Vec<(Region, Option<IndexEntry>)>, Vec<Chunk>), MergeError> {
        let mut grafts = Vec::with_capacity(decided.len());
        let mut authored = Vec::new();
        for (record, choice) in decided {
            let region = record.region;
            let invalid = |reason: String| MergeError::InvalidResolution { region, reason };
            match choice {
                ResolutionChoice::Keep(id) => {
                    if !record.candidates().contains(id) {
                        return Err(invalid(format!("{} is not a candidate", id.short())));
                    }
                    let entry = plan
                        .entry_for(&region, *id)
                        .ok_or_else(|| invalid(format!("{} has no entry here", id.short())))?;
                    grafts.push((region, Some(entry)));
                }
                ResolutionChoice::Author(chunk) => {
                    chunk.verify().map_err(|e| invalid(e.to_string()))?;
                    if chunk.kind() != region.layer {
                        return Err(invalid(format!(
                            "{} chunk cannot fill the {} layer",
                            chunk.kind(),
                            region.layer
                        )));
                    }
                    if !region.cell.is_occupied_by(chunk.bounds(), self.graph.cell_size()) {
                        return Err(invalid("authored chunk lies outside the region".to_owned()));
                    }
                    seq += 1;
                    grafts.push((
                        region,
                        Some(IndexEntry {
                            chunk: chunk.id(),
                            bounds: *chunk.bounds(),
                            seq,
                        }),
                    ));
                    authored.push(chunk.clone());
                }
                ResolutionChoice::Clear => grafts.push((region, None)),
            }
        }
        Ok((grafts, authored))
    }
}

/// Check submitted resolutions against the conflict set
fn index_resolutions<'a>(
    plan: &MergePlan,
    resolutions: &'a [Resolution],
) -> Result<BTreeMap<Region, &'a ResolutionChoice>, MergeError> {
    let mut out = BTreeMap::new();
    for resolution in resolutions {
        let region = resolution.region;
        if plan.conflicts.binary_search_by(|c| c.region.cmp(&region)).is_err() {
            return Err(MergeError::UnknownRegion(region));
        }
        if out.insert(region, &resolution.choice).is_some() {
            return Err(MergeError::DuplicateResolution(region));
        }
    }
    Ok(out)
}
