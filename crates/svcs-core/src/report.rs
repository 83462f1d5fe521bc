//! Change reports between two snapshots
//!
//! Region-level diffs are folded into per-chunk changes. A chunk that left
//! one place and reappeared with identical payload elsewhere is reported as
//! a move rather than a removal plus an addition.

use crate::error::RepoError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use svcs_chunk::{Aabb, ChunkId, ChunkPayload, PayloadKind};
use svcs_graph::{SnapshotGraph, SnapshotId};
use svcs_index::SpatialIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    /// Same bucket, different content
    Modified,
    /// Same content, different bounds
    Moved,
}

/// One chunk-level change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChange {
    pub kind: ChangeKind,
    pub layer: PayloadKind,
    pub before: Option<ChunkId>,
    pub after: Option<ChunkId>,
    /// Bounds after the change (before, for removals)
    pub bounds: Aabb,
    /// Most descriptive term of the resulting payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Buckets affected
    pub regions: usize,
}

/// Every change between two snapshots, in region order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub before: SnapshotId,
    pub after: SnapshotId,
    pub changes: Vec<ChunkChange>,
    pub summary: String,
}

impl ChangeReport {
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

/// Compare `before` with `after`
///
/// # Errors
/// Returns error if a snapshot or referenced chunk is missing
pub fn change_report(
    graph: &SnapshotGraph,
    before: SnapshotId,
    after: SnapshotId,
) -> Result<ChangeReport, RepoError> {
    let old = graph.snapshot(&before)?;
    let new = graph.snapshot(&after)?;
    let regions = SpatialIndex::diff(old.index(), new.index())?;

    // Fold bucket changes into chunk pairs, keeping first-seen order
    let mut order: Vec<(Option<ChunkId>, Option<ChunkId>)> = Vec::new();
    let mut touched: HashMap<(Option<ChunkId>, Option<ChunkId>), (PayloadKind, Aabb, usize)> =
        HashMap::new();
    for region in &regions {
        let was = old.index().get(region);
        let now = new.index().get(region);
        let key = (was.map(|e| e.chunk), now.map(|e| e.chunk));
        let Some(bounds) = now.or(was).map(|e| e.bounds) else {
            continue;
        };
        touched
            .entry(key)
            .and_modify(|(_, _, n)| *n += 1)
            .or_insert_with(|| {
                order.push(key);
                (region.layer, bounds, 1)
            });
    }

    let store = graph.store();
    let payload = |id: ChunkId| -> Result<ChunkPayload, RepoError> {
        Ok(store.get(&id)?.payload().clone())
    };

    let mut changes = Vec::with_capacity(order.len());
    for key in &order {
        let (layer, bounds, regions) = touched[key];
        let (kind, shown) = match *key {
            (None, Some(after)) => (ChangeKind::Added, after),
            (Some(before), None) => (ChangeKind::Removed, before),
            (Some(before), Some(after)) => {
                let kind = if payload(before)? == payload(after)? {
                    ChangeKind::Moved
                } else {
                    ChangeKind::Modified
                };
                (kind, after)
            }
            (None, None) => continue,
        };
        changes.push(ChunkChange {
            kind,
            layer,
            before: key.0,
            after: key.1,
            bounds,
            label: describe(&payload(shown)?),
            regions,
        });
    }
    pair_moves(&mut changes, &payload)?;

    let mut report = ChangeReport {
        before,
        after,
        changes,
        summary: String::new(),
    };
    report.summary = format!(
        "{} change(s): {} added, {} removed, {} modified, {} moved",
        report.change_count(),
        report.count(ChangeKind::Added),
        report.count(ChangeKind::Removed),
        report.count(ChangeKind::Modified),
        report.count(ChangeKind::Moved),
    );
    Ok(report)
}

/// Merge removal/addition pairs with identical payloads into moves
fn pair_moves<F>(changes: &mut Vec<ChunkChange>, payload: &F) -> Result<(), RepoError>
where
    F: Fn(ChunkId) -> Result<ChunkPayload, RepoError>,
{
    let mut index = 0;
    while index < changes.len() {
        let (ChangeKind::Removed, Some(removed)) = (changes[index].kind, changes[index].before) else {
            index += 1;
            continue;
        };
        let gone = payload(removed)?;
        let mut partner = None;
        for (j, candidate) in changes.iter().enumerate() {
            if let (ChangeKind::Added, Some(added)) = (candidate.kind, candidate.after) {
                if candidate.layer == changes[index].layer && payload(added)? == gone {
                    partner = Some(j);
                    break;
                }
            }
        }
        if let Some(j) = partner {
            let added = changes.remove(j);
            let at = if j < index { index - 1 } else { index };
            let moved = &mut changes[at];
            moved.kind = ChangeKind::Moved;
            moved.after = added.after;
            moved.bounds = added.bounds;
            moved.regions += added.regions;
            index = at + 1;
        } else {
            index += 1;
        }
    }

    // A chunk moved onto cells it partly occupied shows up twice
    let mut seen: HashMap<_, usize> = HashMap::new();
    let mut merged: Vec<ChunkChange> = Vec::with_capacity(changes.len());
    for change in changes.drain(..) {
        match seen.get(&(change.before, change.after)) {
            Some(&at) => merged[at].regions += change.regions,
            None => {
                seen.insert((change.before, change.after), merged.len());
                merged.push(change);
            }
        }
    }
    *changes = merged;
    Ok(())
}

fn describe(payload: &ChunkPayload) -> Option<String> {
    match payload {
        ChunkPayload::Semantic(labels) => labels.primary().map(str::to_owned),
        other => other.terms().first().map(|t| (*t).to_owned()),
    }
}
