//! Content hashing primitives
//!
//! Provides [`ContentHash`], the 32-byte Blake3 digest every identifier in the
//! repository (chunks, snapshots, merkle roots) is built from.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte Blake3 content hash
///
/// Cheap to copy, totally ordered (so it can key ordered maps), and rendered
/// as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying digest bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a digest from a byte slice
    ///
    /// # Errors
    /// Returns error if the slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| HashError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Blake3 digest of arbitrary bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Domain-separated digest: `tag`, a NUL separator, then `data`
    ///
    /// Two values of different types never share an identifier even if their
    /// encodings happen to collide byte-for-byte.
    #[must_use]
    pub fn compute_tagged(tag: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tag.as_bytes());
        hasher.update(&[0]);
        hasher.update(data);
        Self(*hasher.finalize().as_bytes())
    }

    /// Domain-separated digest of the JSON encoding of `value`
    ///
    /// # Errors
    /// Returns error if `value` cannot be encoded
    pub fn compute_serializable<T>(tag: &str, value: &T) -> Result<Self, HashError>
    where
        T: serde::Serialize + ?Sized,
    {
        let json = serde_json::to_vec(value)?;
        Ok(Self::compute_tagged(tag, &json))
    }

    /// First 8 bytes as 16 hex chars, for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// All-zero digest (empty merkle root)
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&hex::decode(s)?)
    }
}

impl serde::Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors produced when decoding hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Digest of the wrong size
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not valid hex
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Value could not be encoded for hashing
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_rejects_wrong_length() {
        let result = ContentHash::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(HashError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn tagged_digests_are_domain_separated() {
        let plain = ContentHash::compute(b"mesh");
        let geometry = ContentHash::compute_tagged("geometry", b"mesh");
        let semantic = ContentHash::compute_tagged("semantic", b"mesh");
        assert_ne!(plain, geometry);
        assert_ne!(geometry, semantic);
        assert_eq!(geometry, ContentHash::compute_tagged("geometry", b"mesh"));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        let hash = ContentHash::compute(b"scan");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert!(hash.to_string().starts_with(&hash.short()));
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = ContentHash::compute(b"scan");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json.len(), 66);
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn zero_detection() {
        assert!(ContentHash::default().is_zero());
        assert!(!ContentHash::compute(b"x").is_zero());
    }
}
