//! Spatial VCS Core - repository facade
//!
//! Ties the workspace together behind one [`Repository`]:
//! - Loads and validates [`RepoConfig`] from TOML/YAML plus environment overrides
//! - Opens the configured chunk store and snapshot graph
//! - Runs capture sessions through the ingestion pipeline
//! - Proposes merges and accepts conflict resolutions
//! - Answers dashboard queries: branches, history, viewports, label search
//!   and change reports
//! - Broadcasts [`RepoEvent`]s and folds every failure into [`RepoError`]
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_core::prelude::*;
//!
//! # async fn example() -> Result<(), RepoError> {
//! let repo = Repository::open(RepoConfig::in_memory(0.5))?;
//! let session = repo.open_session("main", "probe-1")?;
//! // ... submit StreamMessages ...
//! let outcome = repo.end_session(session.id).await?;
//! println!("committed {} chunks at {}", outcome.chunks, outcome.tip);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod repo;
pub mod report;
pub mod search;

// Re-exports for convenience
pub use config::{ConfigError, IndexConfig, MergeConfig, RepoConfig, StorageBackend, StorageConfig};
pub use control::{dispatch, dispatch_json, ControlRequest, ControlResponse};
pub use error::{ErrorCode, RepoError};
pub use events::RepoEvent;
pub use repo::{Repository, ViewportChunk};
pub use report::{change_report, ChangeKind, ChangeReport, ChunkChange};
pub use search::{search_labels, LabelHit, LabelQuery};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with a repository
    pub use crate::{
        ChangeReport, ControlRequest, ControlResponse, LabelQuery, RepoConfig, RepoError,
        RepoEvent, Repository,
    };
    pub use svcs_chunk::{Aabb, Chunk, ChunkId, ChunkPayload, Point3};
    pub use svcs_graph::{BranchRef, SnapshotId};
    pub use svcs_ingest::{SessionId, StreamMessage};
    pub use svcs_merge::{ConflictPolicy, MergeOptions, Resolution, ResolutionChoice};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
