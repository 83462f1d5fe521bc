//! Chunk store stress test
//!
//! Pushes a batch of chunks, a fraction of them exact duplicates, through
//! `put_many`, then indexes the unique set into one snapshot. Reports store
//! throughput, deduplication and index build time.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use svcs_chunk::{
    Aabb, Chunk, ChunkPayload, ChunkStore, FsChunkStore, Geometry, GeometryKind, MemoryChunkStore,
    Point3, SemanticLabels,
};
use svcs_core::RepoError;
use svcs_graph::{Provenance, ProvenanceKind, SnapshotGraph};

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub chunks: usize,
    /// Fraction of submitted chunks that repeat an earlier one
    pub duplicate_ratio: f64,
    pub seed: u64,
    /// Filesystem store root; in memory when absent
    pub path: Option<PathBuf>,
    pub cache_capacity: u64,
    pub cell_size: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            chunks: 10_000,
            duplicate_ratio: 0.25,
            seed: 42,
            path: None,
            cache_capacity: 10_000,
            cell_size: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub submitted: usize,
    pub unique: usize,
    /// Objects the store gained
    pub stored: usize,
    pub deduplicated: usize,
    pub put_ms: u128,
    pub chunks_per_sec: f64,
    pub index_ms: u128,
    pub buckets: usize,
    pub success: bool,
}

impl StressReport {
    #[must_use]
    pub fn generate_text(&self) -> String {
        format!(
            "Stress Test Report:\n  Submitted:     {}\n  Unique:        {}\n  Stored:        {}\n  Deduplicated:  {}\n  Put time:      {} ms ({:.0} chunks/s)\n  Index build:   {} ms ({} buckets)\n  Success:       {}\n",
            self.submitted,
            self.unique,
            self.stored,
            self.deduplicated,
            self.put_ms,
            self.chunks_per_sec,
            self.index_ms,
            self.buckets,
            self.success,
        )
    }
}

fn random_chunk(rng: &mut StdRng, cell_size: f64, seq: u64) -> Result<Chunk, RepoError> {
    let corner = |rng: &mut StdRng| f64::from(rng.gen_range(0..64_i32)) * cell_size;
    let min = Point3::new(corner(rng), corner(rng), corner(rng));
    let bounds = Aabb::new(
        min,
        Point3::new(min.x + cell_size, min.y + cell_size, min.z + cell_size),
    )
    .map_err(|e| RepoError::Internal(e.to_string()))?;
    let payload = if rng.gen_bool(0.5) {
        ChunkPayload::Geometry(Geometry {
            kind: GeometryKind::PointCloud,
            data: (0..48).map(|_| rng.gen()).collect(),
        })
    } else {
        let confidence = f32::from(rng.gen_range(1_u8..=100)) / 100.0;
        ChunkPayload::Semantic(SemanticLabels::single(format!("object-{}", rng.gen::<u16>()), confidence))
    };
    Chunk::new(bounds, payload, seq).map_err(|e| RepoError::Internal(e.to_string()))
}

/// Run the stress test
///
/// # Errors
/// Returns error if the store cannot be opened or a write fails
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn run_stress(config: &StressConfig) -> Result<StressReport, RepoError> {
    let store: Arc<dyn ChunkStore> = match &config.path {
        Some(path) => Arc::new(FsChunkStore::open(path, config.cache_capacity)?),
        None => Arc::new(MemoryChunkStore::new()),
    };
    let before = store.len();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let ratio = config.duplicate_ratio.clamp(0.0, 0.99);
    let unique_target = ((config.chunks as f64) * (1.0 - ratio)).ceil().max(1.0) as usize;
    let mut chunks = Vec::with_capacity(config.chunks.max(unique_target));
    for seq in 0..unique_target as u64 {
        chunks.push(random_chunk(&mut rng, config.cell_size, seq)?);
    }
    while chunks.len() < config.chunks {
        let copy = chunks[rng.gen_range(0..unique_target)].clone();
        chunks.push(copy);
    }
    chunks.shuffle(&mut rng);
    tracing::info!(chunks = chunks.len(), unique_target, "stress batch generated");

    let started = Instant::now();
    let ids = store.put_many(&chunks)?;
    let put_elapsed = started.elapsed();
    let stored = store.len() - before;

    let mut unique_ids = ids.clone();
    unique_ids.sort_unstable();
    unique_ids.dedup();
    let unique = unique_ids.len();

    // Index one copy of each chunk
    let mut seen = std::collections::HashSet::with_capacity(unique);
    let distinct: Vec<Chunk> = chunks
        .into_iter()
        .filter(|c| seen.insert(c.id()))
        .collect();
    let graph = SnapshotGraph::new(Arc::clone(&store), config.cell_size, "main")?;
    let head = graph.branch("main")?;
    let started = Instant::now();
    let snapshot = graph.commit(&head, &distinct, Provenance::of(ProvenanceKind::Import))?;
    let index_elapsed = started.elapsed();

    let secs = put_elapsed.as_secs_f64();
    let report = StressReport {
        submitted: ids.len(),
        unique,
        stored,
        deduplicated: ids.len() - unique,
        put_ms: put_elapsed.as_millis(),
        chunks_per_sec: if secs > 0.0 { ids.len() as f64 / secs } else { 0.0 },
        index_ms: index_elapsed.as_millis(),
        buckets: snapshot.index().len(),
        success: stored <= unique && graph.verify_references(snapshot.index()).is_ok(),
    };
    tracing::info!(
        stored = report.stored,
        deduplicated = report.deduplicated,
        put_ms = report.put_ms,
        "stress test finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_stored_once() {
        let report = run_stress(&StressConfig {
            chunks: 400,
            duplicate_ratio: 0.5,
            ..StressConfig::default()
        })
        .unwrap();
        assert!(report.success);
        assert_eq!(report.submitted, 400);
        assert_eq!(report.stored, report.unique);
        assert_eq!(report.deduplicated, 400 - report.unique);
        assert!(report.unique <= 200);
    }
}
