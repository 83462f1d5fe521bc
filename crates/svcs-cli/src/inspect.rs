//! Filesystem store inspection

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use svcs_chunk::{Aabb, ChunkStore, FsChunkStore, StoreError};
use svcs_core::RepoError;

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub root: PathBuf,
    pub objects: usize,
    /// Objects per payload kind
    pub by_kind: BTreeMap<String, usize>,
    pub disk_bytes: u64,
    /// Union of every readable chunk's bounds
    pub extent: Option<Aabb>,
    /// Objects that failed to load or verify
    pub damaged: Vec<String>,
}

impl InspectReport {
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.damaged.is_empty()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = format!(
            "Chunk store at {}\n  Objects:   {}\n  On disk:   {} bytes\n",
            self.root.display(),
            self.objects,
            self.disk_bytes
        );
        for (kind, count) in &self.by_kind {
            out.push_str(&format!("  {kind:<10} {count}\n"));
        }
        if let Some(extent) = &self.extent {
            let (min, max) = (extent.min(), extent.max());
            out.push_str(&format!(
                "  Extent:    ({:.2}, {:.2}, {:.2}) .. ({:.2}, {:.2}, {:.2})\n",
                min.x, min.y, min.z, max.x, max.y, max.z
            ));
        }
        if self.damaged.is_empty() {
            out.push_str("  Integrity: OK\n");
        } else {
            out.push_str(&format!("  Integrity: {} damaged object(s)\n", self.damaged.len()));
            for line in &self.damaged {
                out.push_str(&format!("    {line}\n"));
            }
        }
        out
    }
}

/// Read and verify every object under `root`
///
/// # Errors
/// Returns error if the store directory cannot be opened or scanned
pub fn inspect_store(root: &Path, cache_capacity: u64) -> Result<InspectReport, RepoError> {
    if !root.is_dir() {
        return Err(RepoError::NotFound(format!("chunk store {}", root.display())));
    }
    let store = FsChunkStore::open(root, cache_capacity)?;
    let mut ids = store.ids();
    ids.sort_unstable();

    let mut by_kind = BTreeMap::new();
    let mut extent: Option<Aabb> = None;
    let mut damaged = Vec::new();
    for id in &ids {
        match store.get(id) {
            Ok(chunk) => {
                *by_kind.entry(chunk.kind().to_string()).or_insert(0) += 1;
                extent = Some(match extent {
                    Some(e) => e.union(chunk.bounds()),
                    None => *chunk.bounds(),
                });
            }
            Err(e @ (StoreError::Corrupt { .. } | StoreError::Integrity(_) | StoreError::Encoding(_))) => {
                damaged.push(format!("{id}: {e}"));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let report = InspectReport {
        root: root.to_path_buf(),
        objects: ids.len(),
        by_kind,
        disk_bytes: store.disk_usage()?,
        extent,
        damaged,
    };
    tracing::info!(
        root = %root.display(),
        objects = report.objects,
        damaged = report.damaged.len(),
        "inspected chunk store"
    );
    Ok(report)
}
