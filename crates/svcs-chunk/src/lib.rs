//! Spatial VCS chunk layer
//!
//! Content-addressed spatial chunks and the stores that hold them.
//!
//! # Core Concepts
//!
//! - [`Chunk`]: immutable unit of spatial content (bounds + typed payload)
//! - [`ChunkId`]: Blake3 identity over the payload type tag and canonical content
//! - [`ChunkPayload`]: closed set of payload kinds (geometry, semantic, audio, agent edit)
//! - [`ChunkStore`]: idempotent, write-once storage contract
//! - [`ContentMerkleTree`]: set commitment over chunk ids, used for snapshot roots
//!
//! # Example
//!
//! ```rust,ignore
//! use svcs_chunk::{Aabb, Chunk, ChunkPayload, ChunkStore, MemoryChunkStore, Point3, SemanticLabels};
//!
//! let store = MemoryChunkStore::new();
//! let bounds = Aabb::cube(Point3::new(0.0, 0.0, 0.0), 1.0)?;
//! let chunk = Chunk::new(bounds, ChunkPayload::Semantic(SemanticLabels::single("chair", 0.9)), 1)?;
//!
//! // Same content from another probe deduplicates
//! assert_eq!(store.put(&chunk)?, store.put(&chunk.with_seq(42))?);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bounds;
mod chunk;
mod hash;
mod payload;

pub mod merkle;
pub mod store;

pub use bounds::{Aabb, BoundsError, Point3};
pub use chunk::{Chunk, ChunkError, ChunkId};
pub use hash::{ContentHash, HashError};
pub use merkle::ContentMerkleTree;
pub use payload::{
    AgentEdit, AudioAnnotation, ChunkPayload, EditOp, Geometry, GeometryKind, PayloadKind,
    SemanticLabels,
};
pub use store::{ChunkStore, FsChunkStore, MemoryChunkStore, StoreError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
