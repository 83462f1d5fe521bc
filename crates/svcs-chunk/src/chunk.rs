//! Content-addressed chunks
//!
//! A [`Chunk`] is the immutable unit of spatial content. Its [`ChunkId`] is
//! derived from the payload type tag and the canonical encoding of
//! `(bounds, payload)`; the source sequence number rides along for ordering but
//! never contributes to identity, so two probes capturing the same surface
//! produce the same id.

use crate::bounds::Aabb;
use crate::hash::{ContentHash, HashError};
use crate::payload::{ChunkPayload, PayloadKind};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Chunk identifier (content hash)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(ContentHash);

impl ChunkId {
    /// Wrap a content hash
    #[inline]
    #[must_use]
    pub const fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Underlying hash
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.0
    }

    /// Abbreviated form for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl Display for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for ChunkId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Immutable unit of spatial content
///
/// # Invariants
/// - `id == Chunk::compute_id(&bounds, &payload)`
/// - `payload.validate()` succeeded at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    id: ChunkId,
    bounds: Aabb,
    payload: ChunkPayload,
    /// Source stream sequence number (not part of identity)
    seq: u64,
}

impl Chunk {
    /// Create a chunk, validating the payload and computing its id
    ///
    /// # Errors
    /// Returns error if the payload violates its invariants
    pub fn new(bounds: Aabb, payload: ChunkPayload, seq: u64) -> Result<Self, ChunkError> {
        payload.validate().map_err(ChunkError::InvalidPayload)?;
        let id = Self::compute_id(&bounds, &payload)?;
        Ok(Self {
            id,
            bounds,
            payload,
            seq,
        })
    }

    /// Identifier the given content would receive
    ///
    /// # Errors
    /// Returns error if the content cannot be encoded
    pub fn compute_id(bounds: &Aabb, payload: &ChunkPayload) -> Result<ChunkId, ChunkError> {
        let hash = ContentHash::compute_serializable(payload.kind().type_tag(), &(bounds, payload))?;
        Ok(ChunkId(hash))
    }

    /// Content identifier
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    /// Bounding volume
    #[inline]
    #[must_use]
    pub const fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Typed payload
    #[inline]
    #[must_use]
    pub const fn payload(&self) -> &ChunkPayload {
        &self.payload
    }

    /// Payload kind, which is also the index layer
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }

    /// Source sequence number
    #[inline]
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Same content under a different sequence number
    #[must_use]
    pub fn with_seq(&self, seq: u64) -> Self {
        Self { seq, ..self.clone() }
    }

    /// Verify integrity (useful after deserialization)
    ///
    /// # Errors
    /// Returns [`ChunkError::HashMismatch`] if the stored id does not match the
    /// content, or the validation error if the payload is malformed
    pub fn verify(&self) -> Result<(), ChunkError> {
        self.payload.validate().map_err(ChunkError::InvalidPayload)?;
        let actual = Self::compute_id(&self.bounds, &self.payload)?;
        if actual == self.id {
            Ok(())
        } else {
            Err(ChunkError::HashMismatch {
                expected: self.id,
                actual,
            })
        }
    }
}

/// Errors related to chunk construction and integrity
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Payload invariant violation
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Integrity check failed
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: ChunkId, actual: ChunkId },

    /// Content could not be encoded
    #[error(transparent)]
    Hash(#[from] HashError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Point3;
    use crate::payload::{AudioAnnotation, SemanticLabels};

    fn unit_box() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)).unwrap()
    }

    fn chair() -> ChunkPayload {
        ChunkPayload::Semantic(SemanticLabels::single("chair", 0.9))
    }

    #[test]
    fn sequence_number_does_not_affect_identity() {
        let a = Chunk::new(unit_box(), chair(), 1).unwrap();
        let b = Chunk::new(unit_box(), chair(), 99).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn bounds_affect_identity() {
        let moved = Aabb::cube(Point3::new(5.0, 5.0, 5.0), 1.0).unwrap();
        let a = Chunk::new(unit_box(), chair(), 1).unwrap();
        let b = Chunk::new(moved, chair(), 1).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn invalid_payload_is_rejected() {
        let empty = ChunkPayload::Audio(AudioAnnotation {
            transcript: "   ".into(),
            language: None,
            start_ms: 0,
            duration_ms: 10,
        });
        assert!(matches!(
            Chunk::new(unit_box(), empty, 0),
            Err(ChunkError::InvalidPayload(_))
        ));
    }

    #[test]
    fn verify_detects_tampering() {
        let chunk = Chunk::new(unit_box(), chair(), 1).unwrap();
        assert!(chunk.verify().is_ok());

        let mut json = serde_json::to_value(&chunk).unwrap();
        json["payload"]["body"]["labels"]["chair"] = serde_json::json!(0.1);
        let tampered: Chunk = serde_json::from_value(json).unwrap();
        assert!(matches!(
            tampered.verify(),
            Err(ChunkError::HashMismatch { .. })
        ));
    }

    #[test]
    fn id_parses_from_display() {
        let chunk = Chunk::new(unit_box(), chair(), 1).unwrap();
        let parsed: ChunkId = chunk.id().to_string().parse().unwrap();
        assert_eq!(parsed, chunk.id());
    }
}
