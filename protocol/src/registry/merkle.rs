//! Binary Merkle tree over the ordered credential list.
//!
//! The tree is rebuilt from scratch on every call. That keeps exactly one
//! code path that computes roots, and the witness format the circuit
//! consumes is a direct read-out of it.
//!
//! ## Shape
//!
//! ```text
//!            root
//!          /      \
//!       h01        h2z          h2z = H(c2, 0)
//!      /   \      /   \
//!    c0    c1   c2     0        odd level → pad with the zero element
//!    |     |    |
//!    v0    v1   v2              c_i = hash_leaf(v_i)
//! ```
//!
//! - Callers hand in leaf *values*; level 0 holds their commitments.
//! - Depth is `ceil(log2(n))`. One leaf's commitment is the root at depth 0.
//! - The empty tree has root zero and depth 0.
//! - A proof for leaf `i` holds one sibling per level and one direction bit
//!   per level: `0` means the sibling is the left child, `1` the right.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};

use super::hasher::{hash_leaf, hash_pair, padding};
use crate::crypto::hash::{field_from_hex, field_to_hex};

/// Direction bit: the sibling sits to the left of the running hash.
pub const SIBLING_LEFT: u8 = 0;

/// Direction bit: the sibling sits to the right of the running hash.
pub const SIBLING_RIGHT: u8 = 1;

/// A fully materialized tree. `levels[0]` are the leaf commitments, the
/// last level holds only the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    values: Vec<Fr>,
    levels: Vec<Vec<Fr>>,
}

impl MerkleTree {
    pub fn build(values: Vec<Fr>) -> Self {
        if values.is_empty() {
            return Self {
                values,
                levels: Vec::new(),
            };
        }
        let mut levels = vec![values.iter().map(hash_leaf).collect::<Vec<_>>()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&padding())))
                .collect();
            levels.push(next);
        }
        Self { values, levels }
    }

    pub fn root(&self) -> Fr {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or_else(padding)
    }

    /// Number of hashing levels between a leaf and the root.
    pub fn depth(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn leaf_count(&self) -> usize {
        self.values.len()
    }

    /// The leaf value at `index`, before commitment.
    pub fn leaf(&self, index: usize) -> Option<Fr> {
        self.values.get(index).copied()
    }

    /// Siblings and direction bits from leaf `index` up to the root.
    pub fn path(&self, index: usize) -> Option<(Vec<Fr>, Vec<u8>)> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut siblings = Vec::with_capacity(self.depth());
        let mut directions = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.levels[..self.depth()] {
            let sibling = level.get(position ^ 1).copied().unwrap_or_else(padding);
            siblings.push(sibling);
            directions.push(if position % 2 == 0 {
                SIBLING_RIGHT
            } else {
                SIBLING_LEFT
            });
            position /= 2;
        }
        Some((siblings, directions))
    }
}

/// Depth of a tree holding `leaf_count` leaves: `ceil(log2(n))`, and 0 for
/// an empty or single-leaf tree.
pub fn depth_for(leaf_count: u64) -> usize {
    match leaf_count {
        0 | 1 => 0,
        n => (u64::BITS - (n - 1).leading_zeros()) as usize,
    }
}

/// Commit to the leaf value `leaf` and fold it up through `siblings`
/// following `directions`.
///
/// Returns `None` if the slices disagree in length or a direction is not
/// a bit.
pub fn compute_root(leaf: &Fr, siblings: &[Fr], directions: &[u8]) -> Option<Fr> {
    if siblings.len() != directions.len() {
        return None;
    }
    let mut acc = hash_leaf(leaf);
    for (sibling, direction) in siblings.iter().zip(directions) {
        acc = match *direction {
            SIBLING_LEFT => hash_pair(sibling, &acc),
            SIBLING_RIGHT => hash_pair(&acc, sibling),
            _ => return None,
        };
    }
    Some(acc)
}

// ---------------------------------------------------------------------------
// InclusionProof
// ---------------------------------------------------------------------------

/// A classical inclusion proof, in the hex form clients receive.
///
/// The same fields feed the membership circuit as its witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: u64,
    pub leaf: String,
    pub siblings: Vec<String>,
    pub directions: Vec<u8>,
    pub root: String,
}

impl InclusionProof {
    pub fn from_tree(tree: &MerkleTree, index: usize) -> Option<Self> {
        let leaf = tree.leaf(index)?;
        let (siblings, directions) = tree.path(index)?;
        Some(Self {
            leaf_index: index as u64,
            leaf: field_to_hex(&leaf),
            siblings: siblings.iter().map(field_to_hex).collect(),
            directions,
            root: field_to_hex(&tree.root()),
        })
    }

    /// Does this path take `leaf` to the proof's root?
    pub fn verify_leaf(&self, leaf: &Fr) -> bool {
        let Ok(root) = field_from_hex(&self.root) else {
            return false;
        };
        let Ok(siblings) = self
            .siblings
            .iter()
            .map(|s| field_from_hex(s))
            .collect::<Result<Vec<_>, _>>()
        else {
            return false;
        };
        compute_root(leaf, &siblings, &self.directions) == Some(root)
    }

    /// Check the proof against its own embedded leaf.
    pub fn verify(&self) -> bool {
        match field_from_hex(&self.leaf) {
            Ok(leaf) => self.verify_leaf(&leaf),
            Err(_) => false,
        }
    }
}
