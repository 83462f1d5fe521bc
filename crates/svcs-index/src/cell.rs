//! Grid cells and regions
//!
//! Space is partitioned into cubic cells of edge `cell_size`. A [`Region`] is
//! one cell on one layer; it is the unit the index stores, diffs and merges.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;
use svcs_chunk::{Aabb, PayloadKind, Point3};

/// Integer grid coordinate of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellKey {
    /// Create a cell key
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// World-space box covered by this cell
    ///
    /// `None` if `cell_size` is not a positive finite number.
    #[must_use]
    pub fn bounds(&self, cell_size: f64) -> Option<Aabb> {
        let lo = |v: i32| f64::from(v) * cell_size;
        let hi = |v: i32| (f64::from(v) + 1.0) * cell_size;
        Aabb::new(
            Point3::new(lo(self.x), lo(self.y), lo(self.z)),
            Point3::new(hi(self.x), hi(self.y), hi(self.z)),
        )
        .ok()
    }

    /// Whether a chunk with `bounds` claims this cell
    ///
    /// Uses the same half-open rule as indexing, so touching a cell's face
    /// does not occupy it.
    #[must_use]
    pub fn is_occupied_by(&self, bounds: &Aabb, cell_size: f64) -> bool {
        let span = CellSpan::occupied(bounds, cell_size);
        span.x.contains(&self.x) && span.y.contains(&self.y) && span.z.contains(&self.z)
    }
}

impl Display for CellKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// One bucket of the index: a cell on a payload layer
///
/// Ordered by layer, then cell (x, y, z), so a `(layer, x, y)` column is a
/// contiguous key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Region {
    pub layer: PayloadKind,
    pub cell: CellKey,
}

impl Region {
    /// Create a region
    #[inline]
    #[must_use]
    pub const fn new(layer: PayloadKind, cell: CellKey) -> Self {
        Self { layer, cell }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.layer, self.cell)
    }
}

/// Per-axis cell ranges of a box
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CellSpan {
    pub(crate) x: RangeInclusive<i32>,
    pub(crate) y: RangeInclusive<i32>,
    pub(crate) z: RangeInclusive<i32>,
}

impl CellSpan {
    /// Cells whose interior a chunk's bounds occupy
    ///
    /// Half-open on the upper side: a unit box at the origin occupies exactly
    /// one unit cell. Degenerate boxes still occupy the cell they sit in.
    pub(crate) fn occupied(bounds: &Aabb, cell_size: f64) -> Self {
        let axis = |min: f64, max: f64| {
            let lo = floor_cell(min / cell_size);
            let hi = ceil_cell(max / cell_size).saturating_sub(1).max(lo);
            lo..=hi
        };
        let (min, max) = (bounds.min(), bounds.max());
        Self {
            x: axis(min.x, max.x),
            y: axis(min.y, max.y),
            z: axis(min.z, max.z),
        }
    }

    /// Cells that may hold a chunk intersecting the closed box `bounds`
    ///
    /// One cell wider on the low side than [`occupied`](Self::occupied), so a
    /// chunk whose upper face touches the query is still found.
    pub(crate) fn touching(bounds: &Aabb, cell_size: f64) -> Self {
        let axis = |min: f64, max: f64| {
            let lo = ceil_cell(min / cell_size).saturating_sub(1);
            let hi = floor_cell(max / cell_size).max(lo);
            lo..=hi
        };
        let (min, max) = (bounds.min(), bounds.max());
        Self {
            x: axis(min.x, max.x),
            y: axis(min.y, max.y),
            z: axis(min.z, max.z),
        }
    }

    /// Total number of cells
    pub(crate) fn count(&self) -> u128 {
        let len = |r: &RangeInclusive<i32>| {
            u128::from((i64::from(*r.end()) - i64::from(*r.start()) + 1).unsigned_abs())
        };
        len(&self.x) * len(&self.y) * len(&self.z)
    }

    /// Every cell in the span, x-major
    pub(crate) fn cells(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.x.clone().flat_map(move |x| {
            self.y
                .clone()
                .flat_map(move |y| self.z.clone().map(move |z| CellKey::new(x, y, z)))
        })
    }
}

// Float-to-int casts saturate, which pins absurd coordinates to the grid edge.
#[allow(clippy::cast_possible_truncation)]
fn floor_cell(v: f64) -> i32 {
    v.floor() as i32
}

#[allow(clippy::cast_possible_truncation)]
fn ceil_cell(v: f64) -> i32 {
    v.ceil() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(min: (f64, f64, f64), max: (f64, f64, f64)) -> Aabb {
        Aabb::new(Point3::new(min.0, min.1, min.2), Point3::new(max.0, max.1, max.2)).unwrap()
    }

    #[test]
    fn unit_box_occupies_one_cell() {
        let span = CellSpan::occupied(&boxed((0.0, 0.0, 0.0), (1.0, 1.0, 1.0)), 1.0);
        assert_eq!(span.count(), 1);
        assert_eq!(span.cells().collect::<Vec<_>>(), vec![CellKey::new(0, 0, 0)]);
    }

    #[test]
    fn negative_coordinates_floor_downwards() {
        let span = CellSpan::occupied(&boxed((-0.5, -0.5, -0.5), (0.5, 0.5, 0.5)), 1.0);
        assert_eq!(span.x, -1..=0);
        assert_eq!(span.count(), 8);
    }

    #[test]
    fn degenerate_box_occupies_its_cell() {
        let p = boxed((2.5, 2.5, 2.5), (2.5, 2.5, 2.5));
        assert_eq!(CellSpan::occupied(&p, 1.0).count(), 1);
    }

    #[test]
    fn touching_span_includes_lower_neighbour_on_boundary() {
        let span = CellSpan::touching(&boxed((1.0, 1.0, 1.0), (1.5, 1.5, 1.5)), 1.0);
        assert_eq!(span.x, 0..=1);
    }

    #[test]
    fn face_contact_does_not_occupy_neighbour() {
        let unit = boxed((0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
        assert!(CellKey::new(0, 0, 0).is_occupied_by(&unit, 1.0));
        assert!(!CellKey::new(1, 0, 0).is_occupied_by(&unit, 1.0));
        assert!(!CellKey::new(-1, 0, 0).is_occupied_by(&unit, 1.0));
    }

    #[test]
    fn regions_order_by_layer_first() {
        let geometry = Region::new(PayloadKind::Geometry, CellKey::new(9, 9, 9));
        let semantic = Region::new(PayloadKind::Semantic, CellKey::new(0, 0, 0));
        assert!(geometry < semantic);
        assert_eq!(semantic.to_string(), "semantic@0,0,0");
    }
}
