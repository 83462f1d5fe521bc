//! Filesystem chunk store
//!
//! Objects live at `<root>/objects/<first 2 hex>/<remaining 62 hex>.json`.
//! Writes go to a temp file under `<root>/tmp`, are fsynced, then atomically
//! renamed into place, so a crash never leaves a half-written object visible.

use super::{record_put, ChunkStore, StoreError};
use crate::chunk::{Chunk, ChunkId};
use dashmap::DashSet;
use moka::sync::Cache;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";

/// Durable chunk store backed by a directory tree
#[derive(Debug)]
pub struct FsChunkStore {
    root: PathBuf,
    known: DashSet<ChunkId>,
    cache: Cache<ChunkId, Arc<Chunk>>,
}

impl FsChunkStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// Existing objects are indexed so `exists` and `len` stay cheap.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created or scanned
    pub fn open(root: impl AsRef<Path>, cache_capacity: u64) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join(OBJECTS_DIR), root.join(TMP_DIR)] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let store = Self {
            known: DashSet::new(),
            cache: Cache::new(cache_capacity),
            root,
        };
        store.scan()?;
        tracing::debug!(root = %store.root.display(), objects = store.known.len(), "opened chunk store");
        Ok(store)
    }

    /// Store root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total size in bytes of all stored objects
    ///
    /// # Errors
    /// Returns error if an object's metadata cannot be read
    pub fn disk_usage(&self) -> Result<u64, StoreError> {
        self.known.iter().try_fold(0u64, |total, id| {
            let path = self.object_path(&id);
            let meta = fs::metadata(&path).map_err(|e| StoreError::io(&path, e))?;
            Ok(total + meta.len())
        })
    }

    fn object_path(&self, id: &ChunkId) -> PathBuf {
        let hex = id.to_string();
        let (fan, rest) = hex.split_at(2);
        self.root.join(OBJECTS_DIR).join(fan).join(format!("{rest}.json"))
    }

    fn scan(&self) -> Result<(), StoreError> {
        let objects = self.root.join(OBJECTS_DIR);
        for fan in fs::read_dir(&objects).map_err(|e| StoreError::io(&objects, e))? {
            let fan = fan.map_err(|e| StoreError::io(&objects, e))?.path();
            if !fan.is_dir() {
                continue;
            }
            let prefix = file_name(&fan);
            for entry in fs::read_dir(&fan).map_err(|e| StoreError::io(&fan, e))? {
                let path = entry.map_err(|e| StoreError::io(&fan, e))?.path();
                let name = file_name(&path);
                let Some(stem) = name.strip_suffix(".json") else {
                    continue;
                };
                match format!("{prefix}{stem}").parse::<ChunkId>() {
                    Ok(id) => {
                        self.known.insert(id);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring stray file in object store");
                    }
                }
            }
        }
        Ok(())
    }

    fn write_object(&self, chunk: &Chunk, path: &Path) -> Result<(), StoreError> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

        let bytes = serde_json::to_vec(chunk)?;
        let tmp_dir = self.root.join(TMP_DIR);
        let mut tmp =
            tempfile::NamedTempFile::new_in(&tmp_dir).map_err(|e| StoreError::io(&tmp_dir, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

        #[cfg(unix)]
        fs::File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| StoreError::io(parent, e))?;
        Ok(())
    }

    fn read_object(&self, id: &ChunkId) -> Result<Chunk, StoreError> {
        let path = self.object_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*id));
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let chunk: Chunk = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            id: *id,
            reason: e.to_string(),
        })?;
        chunk.verify()?;
        if chunk.id() != *id {
            return Err(StoreError::Corrupt {
                id: *id,
                reason: format!("object holds chunk {}", chunk.id()),
            });
        }
        Ok(chunk)
    }
}

impl ChunkStore for FsChunkStore {
    fn put(&self, chunk: &Chunk) -> Result<ChunkId, StoreError> {
        chunk.verify()?;
        let id = chunk.id();
        if self.known.contains(&id) {
            record_put(false);
            return Ok(id);
        }

        // Racing writers of the same id rename identical bytes over each other.
        self.write_object(chunk, &self.object_path(&id))?;
        let inserted = self.known.insert(id);
        record_put(inserted);
        tracing::trace!(chunk = %id.short(), inserted, "persisted chunk");
        Ok(id)
    }

    fn get(&self, id: &ChunkId) -> Result<Arc<Chunk>, StoreError> {
        if let Some(chunk) = self.cache.get(id) {
            return Ok(chunk);
        }
        let chunk = Arc::new(self.read_object(id)?);
        self.known.insert(*id);
        self.cache.insert(*id, Arc::clone(&chunk));
        Ok(chunk)
    }

    fn exists(&self, id: &ChunkId) -> bool {
        self.known.contains(id)
    }

    fn len(&self) -> usize {
        self.known.len()
    }

    fn ids(&self) -> Vec<ChunkId> {
        self.known.iter().map(|id| *id).collect()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::{Aabb, Point3};
    use crate::payload::{ChunkPayload, Geometry, GeometryKind};

    fn mesh(byte: u8) -> Chunk {
        Chunk::new(
            Aabb::cube(Point3::new(1.0, 2.0, 3.0), 0.5).unwrap(),
            ChunkPayload::Geometry(Geometry {
                kind: GeometryKind::Mesh,
                data: vec![byte; 16],
            }),
            u64::from(byte),
        )
        .unwrap()
    }

    #[test]
    fn objects_use_fan_out_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::open(dir.path(), 16).unwrap();
        let id = store.put(&mesh(1)).unwrap();

        let hex = id.to_string();
        let expected = dir
            .path()
            .join("objects")
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]));
        assert!(expected.is_file());
        assert_eq!(fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_object_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChunkStore::open(dir.path(), 16).unwrap();
        let id = store.put(&mesh(2)).unwrap();
        fs::write(store.object_path(&id), b"{not json").unwrap();

        let reopened = FsChunkStore::open(dir.path(), 16).unwrap();
        assert!(matches!(reopened.get(&id), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn stray_files_are_ignored_on_scan() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("objects").join("zz")).unwrap();
        fs::write(dir.path().join("objects").join("zz").join("junk.json"), b"").unwrap();
        let store = FsChunkStore::open(dir.path(), 16).unwrap();
        assert!(store.is_empty());
    }
}
