//! Spatial VCS index
//!
//! Per-snapshot spatial index over content-addressed chunks.
//!
//! # Overview
//!
//! - **Region**: one `(layer, cell)` bucket of a uniform grid; layers are
//!   payload kinds so modalities never displace each other
//! - **SpatialIndex**: persistent map from regions to their occupying chunk,
//!   derived from the parent index with structural sharing
//! - **diff**: the set of regions where two indices disagree, the primitive
//!   three-way merges are built on
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_index::SpatialIndex;
//!
//! let root = SpatialIndex::new(0.5)?;
//! let child = SpatialIndex::build(&root, &chunks)?;
//! let changed = SpatialIndex::diff(&root, &child)?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cell;
mod index;

pub use cell::{CellKey, Region};
pub use index::{IndexEntry, IndexError, SpatialIndex, MAX_CELLS_PER_CHUNK};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
