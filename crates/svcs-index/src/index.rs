//! Persistent spatial index
//!
//! Provides [`SpatialIndex`], a uniform grid over `(layer, cell)` buckets backed
//! by an `im::OrdMap`. Every snapshot owns one; building a child index clones
//! the parent in O(1) and path-copies only the buckets the new chunks touch.

use crate::cell::{CellKey, CellSpan, Region};
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use svcs_chunk::{Aabb, AgentEdit, Chunk, ChunkId, ChunkPayload, EditOp, PayloadKind};

/// Upper bound on the cells a single chunk may claim
pub const MAX_CELLS_PER_CHUNK: u128 = 1 << 16;

/// Occupant of one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Chunk covering the bucket
    pub chunk: ChunkId,
    /// Full bounds of that chunk
    pub bounds: Aabb,
    /// Index-local ingestion order; later wins a bucket
    pub seq: u64,
}

/// Per-snapshot spatial index
///
/// # Invariants
/// - `cell_size` is positive and finite
/// - every entry's `seq` is at most `high_water`
/// - an index never changes once built; derived indices share structure
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    entries: OrdMap<Region, IndexEntry>,
    high_water: u64,
}

impl SpatialIndex {
    /// Empty index with the given grid resolution (metres)
    ///
    /// # Errors
    /// Returns [`IndexError::InvalidCellSize`] unless `cell_size` is positive and finite
    pub fn new(cell_size: f64) -> Result<Self, IndexError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(IndexError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            cell_size,
            entries: OrdMap::new(),
            high_water: 0,
        })
    }

    /// Grid resolution
    #[inline]
    #[must_use]
    pub const fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of occupied buckets
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest ingestion sequence applied so far
    #[inline]
    #[must_use]
    pub const fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Occupant of a bucket
    #[inline]
    #[must_use]
    pub fn get(&self, region: &Region) -> Option<&IndexEntry> {
        self.entries.get(region)
    }

    /// Buckets in key order
    pub fn iter(&self) -> impl Iterator<Item = (&Region, &IndexEntry)> {
        self.entries.iter()
    }

    /// Distinct chunks referenced anywhere in the index
    #[must_use]
    pub fn chunk_ids(&self) -> BTreeSet<ChunkId> {
        self.entries.values().map(|e| e.chunk).collect()
    }

    /// Number of cells `chunk` would claim on a grid of `cell_size`
    ///
    /// # Errors
    /// Returns [`IndexError::TooManyCells`] past [`MAX_CELLS_PER_CHUNK`]
    pub fn check_span(chunk: &Chunk, cell_size: f64) -> Result<u128, IndexError> {
        let cells = CellSpan::occupied(chunk.bounds(), cell_size).count();
        if cells > MAX_CELLS_PER_CHUNK {
            return Err(IndexError::TooManyCells {
                chunk: chunk.id(),
                cells,
            });
        }
        Ok(cells)
    }

    /// Derive a child index from `parent` plus `new_chunks`
    ///
    /// Chunks are applied in source-sequence order (ties by id) regardless of
    /// slice order, each receiving the next index sequence number. A chunk
    /// claims every cell its bounds occupy on its own layer; an agent `Clear`
    /// edit first empties the target layer in those cells.
    ///
    /// # Errors
    /// Returns [`IndexError::TooManyCells`] if a chunk spans more than
    /// [`MAX_CELLS_PER_CHUNK`] cells; the parent is never modified
    pub fn build(parent: &Self, new_chunks: &[Chunk]) -> Result<Self, IndexError> {
        let mut ordered: Vec<(&Chunk, CellSpan)> = Vec::with_capacity(new_chunks.len());
        for chunk in new_chunks {
            Self::check_span(chunk, parent.cell_size)?;
            ordered.push((chunk, CellSpan::occupied(chunk.bounds(), parent.cell_size)));
        }
        ordered.sort_by_key(|(chunk, _)| (chunk.seq(), chunk.id()));

        let mut next = parent.clone();
        for (chunk, span) in ordered {
            next.high_water += 1;
            if let ChunkPayload::AgentEdit(AgentEdit {
                op: EditOp::Clear { layer },
                ..
            }) = chunk.payload()
            {
                for cell in span.cells() {
                    next.entries.remove(&Region::new(*layer, cell));
                }
            }

            let entry = IndexEntry {
                chunk: chunk.id(),
                bounds: *chunk.bounds(),
                seq: next.high_water,
            };
            for cell in span.cells() {
                next.entries.insert(Region::new(chunk.kind(), cell), entry);
            }
        }

        tracing::debug!(
            applied = new_chunks.len(),
            buckets = next.entries.len(),
            high_water = next.high_water,
            "built spatial index"
        );
        Ok(next)
    }

    /// Chunks whose bounds intersect `bounds`
    #[must_use]
    pub fn query(&self, bounds: &Aabb) -> BTreeSet<ChunkId> {
        self.query_entries(bounds)
            .into_iter()
            .map(|(_, entry)| entry.chunk)
            .collect()
    }

    /// Buckets near `bounds` whose occupant intersects it
    ///
    /// Scans one key range per `(layer, x, y)` column of the covered cells;
    /// only when the box covers more cells than the index holds entries does
    /// it fall back to a filtered pass over all entries.
    #[must_use]
    pub fn query_entries(&self, bounds: &Aabb) -> Vec<(Region, IndexEntry)> {
        let span = CellSpan::touching(bounds, self.cell_size);
        let layers = PayloadKind::ALL.len() as u128;
        let in_span = |region: &Region| {
            span.x.contains(&region.cell.x)
                && span.y.contains(&region.cell.y)
                && span.z.contains(&region.cell.z)
        };

        if span.count() * layers > self.entries.len() as u128 {
            return self
                .entries
                .iter()
                .filter(|&(region, entry)| in_span(region) && entry.bounds.intersects(bounds))
                .map(|(region, entry)| (*region, *entry))
                .collect();
        }

        let mut hits = Vec::new();
        for layer in PayloadKind::ALL {
            for x in span.x.clone() {
                for y in span.y.clone() {
                    let lo = Region::new(layer, CellKey::new(x, y, *span.z.start()));
                    let hi = Region::new(layer, CellKey::new(x, y, *span.z.end()));
                    hits.extend(
                        self.entries
                            .range(lo..=hi)
                            .filter(|(_, entry)| entry.bounds.intersects(bounds))
                            .map(|(region, entry)| (*region, *entry)),
                    );
                }
            }
        }
        hits
    }

    /// Buckets whose occupying chunk differs between `a` and `b`
    ///
    /// Only chunk identity is compared; a bucket re-claimed by the same chunk
    /// under a different sequence number is not a difference. The result is
    /// symmetric: `diff(a, b) == diff(b, a)`.
    ///
    /// # Errors
    /// Returns [`IndexError::CellSizeMismatch`] if the grids differ
    pub fn diff(a: &Self, b: &Self) -> Result<BTreeSet<Region>, IndexError> {
        if a.cell_size.to_bits() != b.cell_size.to_bits() {
            return Err(IndexError::CellSizeMismatch {
                left: a.cell_size,
                right: b.cell_size,
            });
        }

        let mut out = BTreeSet::new();
        let mut left = a.entries.iter().peekable();
        let mut right = b.entries.iter().peekable();
        loop {
            match (left.peek(), right.peek()) {
                (Some(&(ka, va)), Some(&(kb, vb))) => match ka.cmp(kb) {
                    Ordering::Less => {
                        out.insert(*ka);
                        left.next();
                    }
                    Ordering::Greater => {
                        out.insert(*kb);
                        right.next();
                    }
                    Ordering::Equal => {
                        if va.chunk != vb.chunk {
                            out.insert(*ka);
                        }
                        left.next();
                        right.next();
                    }
                },
                (Some(&(ka, _)), None) => {
                    out.insert(*ka);
                    left.next();
                }
                (None, Some(&(kb, _))) => {
                    out.insert(*kb);
                    right.next();
                }
                (None, None) => break,
            }
        }
        Ok(out)
    }

    /// Copy of this index with individual buckets replaced or emptied
    ///
    /// Used by merges to graft the other side's occupants onto this index.
    #[must_use]
    pub fn overlay<I>(&self, changes: I) -> Self
    where
        I: IntoIterator<Item = (Region, Option<IndexEntry>)>,
    {
        let mut next = self.clone();
        for (region, entry) in changes {
            match entry {
                Some(entry) => {
                    next.high_water = next.high_water.max(entry.seq);
                    next.entries.insert(region, entry);
                }
                None => {
                    next.entries.remove(&region);
                }
            }
        }
        next
    }
}

/// Errors related to spatial indexing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// Grid resolution is zero, negative or not finite
    #[error("invalid cell size: {0}")]
    InvalidCellSize(f64),

    /// Indices built on different grids cannot be compared
    #[error("cell size mismatch: {left} vs {right}")]
    CellSizeMismatch { left: f64, right: f64 },

    /// A chunk's bounds cover too many cells
    #[error("chunk {chunk} spans {cells} cells (max {})", MAX_CELLS_PER_CHUNK)]
    TooManyCells { chunk: ChunkId, cells: u128 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcs_chunk::{Point3, SemanticLabels};

    fn semantic(label: &str, at: (f64, f64, f64), seq: u64) -> Chunk {
        Chunk::new(
            Aabb::new(Point3::new(at.0, at.1, at.2), Point3::new(at.0 + 1.0, at.1 + 1.0, at.2 + 1.0))
                .unwrap(),
            ChunkPayload::Semantic(SemanticLabels::single(label, 0.9)),
            seq,
        )
        .unwrap()
    }

    fn region(x: i32, y: i32, z: i32) -> Region {
        Region::new(PayloadKind::Semantic, CellKey::new(x, y, z))
    }

    #[test]
    fn rejects_bad_cell_size() {
        assert!(SpatialIndex::new(0.0).is_err());
        assert!(SpatialIndex::new(f64::NAN).is_err());
        assert!(SpatialIndex::new(-1.0).is_err());
    }

    #[test]
    fn later_sequence_wins_bucket_regardless_of_slice_order() {
        let root = SpatialIndex::new(1.0).unwrap();
        let chunks = vec![
            semantic("third", (0.0, 0.0, 0.0), 3),
            semantic("first", (0.0, 0.0, 0.0), 1),
            semantic("second", (0.0, 0.0, 0.0), 2),
        ];
        let index = SpatialIndex::build(&root, &chunks).unwrap();
        assert_eq!(index.get(&region(0, 0, 0)).unwrap().chunk, chunks[0].id());
        assert_eq!(index.high_water(), 3);
    }

    #[test]
    fn build_leaves_parent_untouched() {
        let root = SpatialIndex::new(1.0).unwrap();
        let child = SpatialIndex::build(&root, &[semantic("a", (0.0, 0.0, 0.0), 0)]).unwrap();
        assert!(root.is_empty());
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn clear_edit_removes_target_layer_only() {
        let root = SpatialIndex::new(1.0).unwrap();
        let labelled = SpatialIndex::build(&root, &[semantic("cup", (0.0, 0.0, 0.0), 0)]).unwrap();
        let clear = Chunk::new(
            Aabb::cube(Point3::new(0.5, 0.5, 0.5), 1.0).unwrap(),
            ChunkPayload::AgentEdit(AgentEdit {
                agent: "janitor".into(),
                op: EditOp::Clear {
                    layer: PayloadKind::Semantic,
                },
            }),
            1,
        )
        .unwrap();
        let cleared = SpatialIndex::build(&labelled, &[clear.clone()]).unwrap();
        assert!(cleared.get(&region(0, 0, 0)).is_none());
        let agent = Region::new(PayloadKind::Agent, CellKey::new(0, 0, 0));
        assert_eq!(cleared.get(&agent).unwrap().chunk, clear.id());
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let root = SpatialIndex::new(0.01).unwrap();
        let huge = Chunk::new(
            Aabb::cube(Point3::new(0.0, 0.0, 0.0), 100.0).unwrap(),
            ChunkPayload::Semantic(SemanticLabels::single("room", 1.0)),
            0,
        )
        .unwrap();
        assert!(matches!(
            SpatialIndex::check_span(&huge, 0.01),
            Err(IndexError::TooManyCells { .. })
        ));
        assert_eq!(SpatialIndex::check_span(&huge, 10.0).unwrap(), 1_000);
        assert!(matches!(
            SpatialIndex::build(&root, &[huge]),
            Err(IndexError::TooManyCells { .. })
        ));
    }

    #[test]
    fn query_uses_range_scan_and_fallback_consistently() {
        let root = SpatialIndex::new(1.0).unwrap();
        let chunks: Vec<_> = (0..20u32)
            .map(|i| semantic(&format!("c{i}"), (f64::from(i), 0.0, 0.0), u64::from(i)))
            .collect();
        let index = SpatialIndex::build(&root, &chunks).unwrap();

        // Small box: column scans
        let near = Aabb::new(Point3::new(2.2, 0.2, 0.2), Point3::new(3.5, 0.8, 0.8)).unwrap();
        let expected: BTreeSet<_> = [chunks[2].id(), chunks[3].id()].into_iter().collect();
        assert_eq!(index.query(&near), expected);

        // Huge box: filtered full pass
        let everything = Aabb::cube(Point3::new(0.0, 0.0, 0.0), 1000.0).unwrap();
        assert_eq!(index.query(&everything).len(), 20);
    }

    #[test]
    fn diff_ignores_sequence_numbers() {
        let root = SpatialIndex::new(1.0).unwrap();
        let a = SpatialIndex::build(&root, &[semantic("x", (0.0, 0.0, 0.0), 1)]).unwrap();
        let b = SpatialIndex::build(&root, &[semantic("x", (0.0, 0.0, 0.0), 9)]).unwrap();
        assert!(SpatialIndex::diff(&a, &b).unwrap().is_empty());
    }

    #[test]
    fn diff_rejects_mismatched_grids() {
        let a = SpatialIndex::new(1.0).unwrap();
        let b = SpatialIndex::new(0.5).unwrap();
        assert!(matches!(
            SpatialIndex::diff(&a, &b),
            Err(IndexError::CellSizeMismatch { .. })
        ));
    }
}
