//! Axis-aligned bounding volumes
//!
//! [`Aabb`] is the spatial address of a chunk: every chunk covers exactly one
//! box in world coordinates (metres), and every query is expressed as a box.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// A point in world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    /// Create a point
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    // -0.0 and 0.0 must encode identically or equal surfaces hash apart
    fn canonical(self) -> Self {
        Self::new(self.x + 0.0, self.y + 0.0, self.z + 0.0)
    }
}

impl Display for Point3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Axis-aligned bounding box
///
/// # Invariants
/// - `min <= max` on every axis
/// - all coordinates are finite
///
/// Boxes are closed: two boxes sharing a face intersect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAabb")]
pub struct Aabb {
    min: Point3,
    max: Point3,
}

#[derive(Deserialize)]
struct RawAabb {
    min: Point3,
    max: Point3,
}

impl TryFrom<RawAabb> for Aabb {
    type Error = BoundsError;

    fn try_from(raw: RawAabb) -> Result<Self, Self::Error> {
        Aabb::new(raw.min, raw.max)
    }
}

impl Aabb {
    /// Create a box from two corners
    ///
    /// Corners may be given in any order; they are normalized per axis.
    ///
    /// # Errors
    /// Returns error if any coordinate is NaN or infinite
    pub fn new(a: Point3, b: Point3) -> Result<Self, BoundsError> {
        if !a.is_finite() || !b.is_finite() {
            return Err(BoundsError::NonFinite);
        }
        let min = Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)).canonical();
        let max = Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)).canonical();
        Ok(Self { min, max })
    }

    /// Cube centred on `center` with edge length `size`
    ///
    /// # Errors
    /// Returns error if the inputs are not finite or `size` is negative
    pub fn cube(center: Point3, size: f64) -> Result<Self, BoundsError> {
        if size < 0.0 {
            return Err(BoundsError::NegativeExtent(size));
        }
        let h = size / 2.0;
        Self::new(
            Point3::new(center.x - h, center.y - h, center.z - h),
            Point3::new(center.x + h, center.y + h, center.z + h),
        )
    }

    /// Lower corner
    #[inline]
    #[must_use]
    pub const fn min(&self) -> Point3 {
        self.min
    }

    /// Upper corner
    #[inline]
    #[must_use]
    pub const fn max(&self) -> Point3 {
        self.max
    }

    /// Geometric centre
    #[must_use]
    pub fn center(&self) -> Point3 {
        Point3::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    /// Volume in cubic metres (zero for degenerate boxes)
    #[must_use]
    pub fn volume(&self) -> f64 {
        (self.max.x - self.min.x) * (self.max.y - self.min.y) * (self.max.z - self.min.z)
    }

    /// Closed-interval overlap test on all three axes
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    /// Whether `point` lies inside or on the boundary
    #[must_use]
    pub fn contains_point(&self, point: Point3) -> bool {
        (self.min.x..=self.max.x).contains(&point.x)
            && (self.min.y..=self.max.y).contains(&point.y)
            && (self.min.z..=self.max.z).contains(&point.z)
    }

    /// Smallest box enclosing both
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Point3::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }
}

impl Display for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.min, self.max)
    }
}

/// Invalid bounding volume
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsError {
    /// NaN or infinite coordinate
    #[error("bounding box coordinates must be finite")]
    NonFinite,

    /// Cube with negative edge length
    #[error("negative extent: {0}")]
    NegativeExtent(f64),
}
