//! Testing utilities for the Spatial VCS workspace
//!
//! Shared fixtures for chunks, stores and graphs.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;
use svcs_chunk::{
    Aabb, AgentEdit, AudioAnnotation, Chunk, ChunkPayload, ChunkStore, EditOp, Geometry,
    GeometryKind, MemoryChunkStore, PayloadKind, Point3, SemanticLabels,
};
use svcs_graph::{BranchRef, Provenance, ProvenanceKind, Snapshot, SnapshotGraph};

/// Grid resolution used by every fixture
pub const CELL: f64 = 1.0;

/// Unit cube filling grid cell `(x, y, z)`
pub fn cell_box(x: i32, y: i32, z: i32) -> Aabb {
    let min = Point3::new(f64::from(x), f64::from(y), f64::from(z));
    Aabb::new(min, Point3::new(min.x + CELL, min.y + CELL, min.z + CELL)).unwrap()
}

pub fn semantic_chunk(label: &str, cell: (i32, i32, i32), seq: u64) -> Chunk {
    Chunk::new(
        cell_box(cell.0, cell.1, cell.2),
        ChunkPayload::Semantic(SemanticLabels::single(label, 0.9)),
        seq,
    )
    .unwrap()
}

pub fn geometry_chunk(data: &[u8], cell: (i32, i32, i32), seq: u64) -> Chunk {
    Chunk::new(
        cell_box(cell.0, cell.1, cell.2),
        ChunkPayload::Geometry(Geometry {
            kind: GeometryKind::Mesh,
            data: data.to_vec(),
        }),
        seq,
    )
    .unwrap()
}

pub fn audio_chunk(transcript: &str, cell: (i32, i32, i32), seq: u64) -> Chunk {
    Chunk::new(
        cell_box(cell.0, cell.1, cell.2),
        ChunkPayload::Audio(AudioAnnotation {
            transcript: transcript.to_owned(),
            language: Some("en".to_owned()),
            start_ms: seq * 1000,
            duration_ms: 800,
        }),
        seq,
    )
    .unwrap()
}

pub fn clear_chunk(layer: PayloadKind, cell: (i32, i32, i32), seq: u64) -> Chunk {
    Chunk::new(
        cell_box(cell.0, cell.1, cell.2),
        ChunkPayload::AgentEdit(AgentEdit {
            agent: "test-agent".to_owned(),
            op: EditOp::Clear { layer },
        }),
        seq,
    )
    .unwrap()
}

pub fn memory_store() -> Arc<dyn ChunkStore> {
    Arc::new(MemoryChunkStore::new())
}

/// Fresh graph over an in-memory store with a `main` branch
pub fn test_graph() -> SnapshotGraph {
    SnapshotGraph::new(memory_store(), CELL, "main").unwrap()
}

pub fn capture() -> Provenance {
    Provenance::of(ProvenanceKind::Capture)
}

/// Store `chunks` and commit them on top of `branch`'s current tip
pub fn commit_chunks(graph: &SnapshotGraph, branch: &str, chunks: &[Chunk]) -> Arc<Snapshot> {
    graph.store().put_many(chunks).unwrap();
    let head = graph.branch(branch).unwrap();
    graph.commit(&head, chunks, capture()).unwrap()
}

/// Store and commit one semantic label per `(label, cell)`
pub fn commit_labels(
    graph: &SnapshotGraph,
    branch: &str,
    labels: &[(&str, (i32, i32, i32))],
) -> Arc<Snapshot> {
    let chunks: Vec<_> = labels
        .iter()
        .enumerate()
        .map(|(seq, (label, cell))| semantic_chunk(label, *cell, seq as u64))
        .collect();
    commit_chunks(graph, branch, &chunks)
}

/// Fork `name` from the current tip of `from`
pub fn fork(graph: &SnapshotGraph, from: &str, name: &str) -> BranchRef {
    let tip = graph.branch(from).unwrap().tip;
    graph.create_branch(name, tip).unwrap()
}
