//! Spatial VCS merge engine
//!
//! Three-way merges of snapshots, region by region.
//!
//! # Core Concepts
//!
//! - **MergePlan**: read-only comparison of two snapshots through their
//!   common ancestor. Regions changed on one side are carried over; regions
//!   changed on both sides to different chunks become conflicts
//! - **ConflictRecord**: one contested region with the base, ours and theirs
//!   occupants
//! - **Resolution**: `Keep`, `Author` or `Clear` for one contested region
//! - **ConflictPolicy**: `Manual` leaves conflicts to the caller; `Ours` and
//!   `Theirs` settle them automatically
//! - **MergeEngine**: commits the two-parent snapshot and advances the target
//!   branch, or reports pending conflicts without touching anything
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_merge::{MergeEngine, MergeError, MergeOptions, Resolution, ResolutionChoice};
//!
//! let engine = MergeEngine::new(graph.clone());
//! let main = graph.branch("main")?;
//! match engine.propose(&main, feature_tip, &MergeOptions::default()) {
//!     Err(MergeError::ConflictsPending { conflicts, .. }) => {
//!         let picks: Vec<_> = conflicts
//!             .iter()
//!             .map(|c| Resolution::new(c.region, ResolutionChoice::Clear))
//!             .collect();
//!         engine.resolve(&main, feature_tip, &picks, &MergeOptions::default())?;
//!     }
//!     other => println!("{:?}", other?),
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod conflict;
mod engine;
mod error;
mod plan;
mod policy;

pub use conflict::{ConflictRecord, Resolution, ResolutionChoice, ResolutionState};
pub use engine::{MergeEngine, MergeOptions, MergeOutcome};
pub use error::MergeError;
pub use plan::MergePlan;
pub use policy::{ConflictPolicy, UnknownPolicy};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
