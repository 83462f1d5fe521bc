//! Chunk storage backends
//!
//! [`ChunkStore`] is the content-addressed, write-once contract the rest of the
//! repository depends on. Two backends are provided:
//!
//! - [`MemoryChunkStore`]: sharded in-memory map, for tests and ephemeral repos
//! - [`FsChunkStore`]: durable fan-out directory of JSON objects with a read cache
//!
//! # Contract
//! - `put` is idempotent: storing identical content twice yields the same id
//!   and no second copy
//! - `put` returns only after the chunk is durable for the backend
//! - chunks are never mutated or removed

mod fs;
mod memory;

pub use fs::FsChunkStore;
pub use memory::MemoryChunkStore;

use crate::chunk::{Chunk, ChunkError, ChunkId};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Content-addressed chunk storage
///
/// Implementations must be safe to share across threads; concurrent `put`s of
/// the same content are allowed and must converge on one stored object.
pub trait ChunkStore: Send + Sync + std::fmt::Debug {
    /// Persist a chunk, returning its identifier
    ///
    /// # Errors
    /// Returns error if the chunk fails verification or cannot be persisted
    fn put(&self, chunk: &Chunk) -> Result<ChunkId, StoreError>;

    /// Fetch a chunk by id
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] if absent, or an I/O/integrity error
    fn get(&self, id: &ChunkId) -> Result<Arc<Chunk>, StoreError>;

    /// Whether a chunk is stored
    fn exists(&self, id: &ChunkId) -> bool;

    /// Number of distinct chunks stored
    fn len(&self) -> usize;

    /// Whether the store holds no chunks
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of every stored chunk, in unspecified order
    fn ids(&self) -> Vec<ChunkId>;

    /// Persist many chunks in parallel
    ///
    /// Ids are returned in input order. Either every chunk is stored or the
    /// first error is returned; chunks written before the failure stay stored,
    /// which is harmless because nothing references them yet.
    ///
    /// # Errors
    /// Returns the first error encountered
    fn put_many(&self, chunks: &[Chunk]) -> Result<Vec<ChunkId>, StoreError> {
        chunks.par_iter().map(|chunk| self.put(chunk)).collect()
    }
}

/// Errors related to chunk storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Chunk is not in the store
    #[error("chunk not found: {0}")]
    NotFound(ChunkId),

    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored object could not be decoded
    #[error("corrupt object {id}: {reason}")]
    Corrupt { id: ChunkId, reason: String },

    /// Chunk content does not match its id
    #[error("integrity check failed: {0}")]
    Integrity(#[from] ChunkError),

    /// Chunk could not be encoded
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub(crate) fn record_put(inserted: bool) {
    if inserted {
        metrics::counter!("svcs_chunks_stored_total").increment(1);
    } else {
        metrics::counter!("svcs_chunks_deduplicated_total").increment(1);
    }
}
