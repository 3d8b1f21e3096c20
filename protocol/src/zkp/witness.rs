//! Witness material for the membership circuit.
//!
//! A witness arrives either as an [`InclusionProof`] fresh from the registry
//! or as loose hex strings from a client. Both end up here, get parsed into
//! field elements and are folded off-circuit before anything touches the
//! prover. ark-groth16 does not return an error for an unsatisfiable
//! witness, so this check is the only clean rejection path.

use ark_bn254::Fr;

use super::ZkError;
use crate::crypto::hash::field_from_hex;
use crate::registry::merkle::{compute_root, SIBLING_LEFT, SIBLING_RIGHT};
use crate::registry::InclusionProof;

/// Parsed witness: a leaf value, its path and the root it should fold to.
///
/// `depth()` is the path length and becomes the second public input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipWitness {
    pub leaf: Fr,
    pub siblings: Vec<Fr>,
    pub directions: Vec<u8>,
    pub root: Fr,
}

impl MembershipWitness {
    /// Build a witness from already-parsed elements.
    ///
    /// # Errors
    ///
    /// [`ZkError::Witness`] if the path lengths disagree or a direction is
    /// not a bit.
    pub fn new(leaf: Fr, siblings: Vec<Fr>, directions: Vec<u8>, root: Fr) -> Result<Self, ZkError> {
        if siblings.len() != directions.len() {
            return Err(ZkError::Witness(format!(
                "{} siblings but {} directions",
                siblings.len(),
                directions.len()
            )));
        }
        if let Some(bad) = directions
            .iter()
            .find(|d| **d != SIBLING_LEFT && **d != SIBLING_RIGHT)
        {
            return Err(ZkError::Witness(format!("direction {bad} is not 0 or 1")));
        }
        Ok(Self {
            leaf,
            siblings,
            directions,
            root,
        })
    }

    /// Parse hex-encoded field elements.
    pub fn from_hex(
        leaf: &str,
        root: &str,
        siblings: &[String],
        directions: &[u8],
    ) -> Result<Self, ZkError> {
        let parse = |what: &str, hex: &str| {
            field_from_hex(hex).map_err(|e| ZkError::Witness(format!("{what}: {e}")))
        };
        let leaf = parse("leaf", leaf)?;
        let root = parse("root", root)?;
        let siblings = siblings
            .iter()
            .enumerate()
            .map(|(i, s)| parse(&format!("sibling {i}"), s))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(leaf, siblings, directions.to_vec(), root)
    }

    pub fn from_inclusion_proof(proof: &InclusionProof) -> Result<Self, ZkError> {
        Self::from_hex(&proof.leaf, &proof.root, &proof.siblings, &proof.directions)
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Recompute the root off-circuit.
    ///
    /// # Errors
    ///
    /// [`ZkError::ConstraintUnsatisfied`] if the fold does not land on `root`.
    pub fn check(&self) -> Result<(), ZkError> {
        match compute_root(&self.leaf, &self.siblings, &self.directions) {
            Some(root) if root == self.root => Ok(()),
            _ => Err(ZkError::ConstraintUnsatisfied),
        }
    }
}
