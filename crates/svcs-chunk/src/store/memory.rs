//! In-memory chunk store

use super::{record_put, ChunkStore, StoreError};
use crate::chunk::{Chunk, ChunkId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Sharded in-memory chunk store
///
/// "Durable" here means visible to every subsequent `get` once `put` returns.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: DashMap<ChunkId, Arc<Chunk>>,
}

impl MemoryChunkStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, chunk: &Chunk) -> Result<ChunkId, StoreError> {
        chunk.verify()?;
        let id = chunk.id();
        let inserted = match self.chunks.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(chunk.clone()));
                true
            }
        };
        record_put(inserted);
        tracing::trace!(chunk = %id.short(), inserted, "put chunk");
        Ok(id)
    }

    fn get(&self, id: &ChunkId) -> Result<Arc<Chunk>, StoreError> {
        self.chunks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::NotFound(*id))
    }

    fn exists(&self, id: &ChunkId) -> bool {
        self.chunks.contains_key(id)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|entry| *entry.key()).collect()
    }
}
