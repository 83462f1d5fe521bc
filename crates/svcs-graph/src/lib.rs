//! Spatial VCS snapshot graph
//!
//! Append-only DAG of immutable snapshots with compare-and-swap branch pointers.
//!
//! # Overview
//!
//! - **Snapshot**: immutable commit holding a spatial index, parents and provenance
//! - **SnapshotGraph**: lock-free snapshot log plus mutable branch cells
//! - **BranchRef**: the caller's observed tip; every branch mutation is checked
//!   against it, so concurrent writers observe `StaleParent` instead of
//!   overwriting each other
//! - **BranchJournal**: SHA-256 hash chain of every tip movement
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_graph::{Provenance, SnapshotGraph};
//!
//! let graph = SnapshotGraph::new(store, 0.5, "main")?;
//! let main = graph.branch("main")?;
//! let snapshot = graph.commit(&main, &chunks, Provenance::capture("probe-1", "s-1"))?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod graph;
mod journal;
mod snapshot;

pub use error::GraphError;
pub use graph::{BranchRef, SnapshotGraph};
pub use journal::{verify_entries, BranchJournal, BranchOp, JournalEntry};
pub use snapshot::{Provenance, ProvenanceKind, Snapshot, SnapshotId, SnapshotMeta};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
