//! Merkle tree over chunk identifiers
//!
//! Provides [`ContentMerkleTree`], a thin wrapper around `rs_merkle` used to
//! commit a snapshot to the exact set of chunks it references.

use crate::hash::ContentHash;
use rs_merkle::{Hasher, MerkleTree as RsMerkleTree};

/// Wrapper around rs_merkle with [`ContentHash`] leaves
pub struct ContentMerkleTree {
    inner: RsMerkleTree<Blake3Hasher>,
}

impl std::fmt::Debug for ContentMerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentMerkleTree")
            .field("leaf_count", &self.leaf_count())
            .field("root", &self.root())
            .finish()
    }
}

impl ContentMerkleTree {
    /// Build from leaf hashes
    ///
    /// Leaf order matters; callers that want a set commitment sort first.
    #[must_use]
    pub fn from_leaves(leaves: &[ContentHash]) -> Self {
        let leaves: Vec<_> = leaves.iter().map(|h| *h.as_bytes()).collect();
        Self {
            inner: RsMerkleTree::from_leaves(&leaves),
        }
    }

    /// Build a set commitment: leaves are sorted and deduplicated first
    #[must_use]
    pub fn from_set<I>(leaves: I) -> Self
    where
        I: IntoIterator<Item = ContentHash>,
    {
        let mut leaves: Vec<_> = leaves.into_iter().collect();
        leaves.sort_unstable();
        leaves.dedup();
        Self::from_leaves(&leaves)
    }

    /// Root hash of the tree
    ///
    /// Returns zero hash for empty tree.
    #[inline]
    #[must_use]
    pub fn root(&self) -> ContentHash {
        self.inner.root().map_or_else(ContentHash::default, ContentHash::new)
    }

    /// Number of leaves
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.inner.leaves().map_or(0, |leaves| leaves.len())
    }

    /// Check if tree is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaf_count() == 0
    }
}

/// Blake3 hasher adapter for rs_merkle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Blake3Hasher;

impl Hasher for Blake3Hasher {
    type Hash = [u8; 32];

    #[inline]
    fn hash(data: &[u8]) -> Self::Hash {
        *blake3::hash(data).as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes(n: usize) -> Vec<ContentHash> {
        (0..n)
            .map(|i| ContentHash::compute(i.to_string().as_bytes()))
            .collect()
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = ContentMerkleTree::from_leaves(&[]);
        assert!(tree.is_empty());
        assert!(tree.root().is_zero());
    }

    #[test]
    fn set_commitment_ignores_order_and_duplicates() {
        let mut leaves = make_hashes(5);
        let forward = ContentMerkleTree::from_set(leaves.clone());
        leaves.reverse();
        leaves.push(leaves[0]);
        let backward = ContentMerkleTree::from_set(leaves);
        assert_eq!(forward.root(), backward.root());
        assert_eq!(backward.leaf_count(), 5);
    }
}
