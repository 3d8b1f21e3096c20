//! # Membership R1CS Circuit
//!
//! The statement being proved:
//!
//! ```text
//! "I know (leaf, siblings[d], directions[d], active[d]) such that
//!     acc_0 = H_leaf(leaf)
//!     acc_{i+1} = active_i ? (dir_i ? H_node(acc_i, sib_i) : H_node(sib_i, acc_i)) : acc_i
//!     acc_d == root
//!     active_0 + ... + active_{d-1} == depth"
//! ```
//!
//! `H_leaf` and `H_node` are the domain-tagged Poseidon sponges from
//! `registry::hasher`, rebuilt here with `PoseidonSpongeVar`.
//!
//! ## Constraint breakdown
//!
//! One permutation commits to the leaf. Each level then costs two
//! permutations (both child orders are hashed, then one is selected) plus two
//! selects. A real path of length `k` sets the first `k` active bits; the
//! rest are zero. The prefix rule `active_i → active_{i-1}` stops a prover
//! from interleaving dummy levels, and the public `depth` pins `k` to the
//! depth of the tree that produced `root`.
//!
//! Constraint count grows linearly with `max_depth` and does not depend on
//! the real path length.
//!
//! ## Public inputs (in order)
//!
//! | index | value |
//! |-------|-------|
//! | 0     | Merkle root |
//! | 1     | tree depth  |

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::constraints::CryptographicSpongeVar;
use ark_crypto_primitives::sponge::poseidon::constraints::PoseidonSpongeVar;
use ark_r1cs_std::{
    alloc::AllocVar, boolean::Boolean, eq::EqGadget, fields::fp::FpVar, fields::FieldVar,
    select::CondSelectGadget,
};
use ark_relations::r1cs::{ConstraintSynthesizer, ConstraintSystemRef, SynthesisError};

use super::witness::MembershipWitness;
use super::ZkError;
use crate::config::{MERKLE_LEAF_DOMAIN, MERKLE_NODE_DOMAIN};
use crate::registry::hasher::{padding, poseidon_config};
use crate::registry::merkle::SIBLING_RIGHT;

// ---------------------------------------------------------------------------
// Circuit definition
// ---------------------------------------------------------------------------

/// Groth16 circuit proving Merkle membership at a fixed maximum depth.
///
/// Witness slots are `Option` so the same struct serves key generation,
/// where only the shape matters.
#[derive(Clone)]
pub struct MembershipCircuit {
    max_depth: usize,

    // -- Public inputs ------------------------------------------------------
    root: Option<Fr>,
    depth: Option<u64>,

    // -- Private witness ----------------------------------------------------
    /// Leaf value; the circuit commits to it.
    leaf: Option<Fr>,
    siblings: Vec<Option<Fr>>,
    /// `true` = sibling on the right.
    directions: Vec<Option<bool>>,
    active: Vec<Option<bool>>,
}

impl MembershipCircuit {
    /// A witness-free circuit for key generation.
    pub fn blank(max_depth: usize) -> Self {
        Self {
            max_depth,
            root: None,
            depth: None,
            leaf: None,
            siblings: vec![None; max_depth],
            directions: vec![None; max_depth],
            active: vec![None; max_depth],
        }
    }

    /// Populate the circuit from a parsed witness, padding to `max_depth`.
    pub fn from_witness(witness: &MembershipWitness, max_depth: usize) -> Result<Self, ZkError> {
        let depth = witness.depth();
        if depth > max_depth {
            return Err(ZkError::DepthExceeded { depth, max_depth });
        }
        let pad = max_depth - depth;

        let siblings = witness
            .siblings
            .iter()
            .copied()
            .chain(std::iter::repeat(padding()).take(pad))
            .map(Some)
            .collect();
        let directions = witness
            .directions
            .iter()
            .map(|d| *d == SIBLING_RIGHT)
            .chain(std::iter::repeat(false).take(pad))
            .map(Some)
            .collect();
        let active = (0..max_depth).map(|i| Some(i < depth)).collect();

        Ok(Self {
            max_depth,
            root: Some(witness.root),
            depth: Some(depth as u64),
            leaf: Some(witness.leaf),
            siblings,
            directions,
            active,
        })
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

// ---------------------------------------------------------------------------
// Constraint synthesizer
// ---------------------------------------------------------------------------

impl ConstraintSynthesizer<Fr> for MembershipCircuit {
    fn generate_constraints(self, cs: ConstraintSystemRef<Fr>) -> Result<(), SynthesisError> {
        let root_var = FpVar::<Fr>::new_input(ark_relations::ns!(cs, "root"), || {
            self.root.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let depth_var = FpVar::<Fr>::new_input(ark_relations::ns!(cs, "depth"), || {
            self.depth.map(Fr::from).ok_or(SynthesisError::AssignmentMissing)
        })?;

        let leaf = FpVar::<Fr>::new_witness(ark_relations::ns!(cs, "leaf"), || {
            self.leaf.ok_or(SynthesisError::AssignmentMissing)
        })?;
        let mut acc = hash_leaf_var(cs.clone(), &leaf)?;

        let mut active_levels = FpVar::<Fr>::zero();
        let mut previous_active: Option<Boolean<Fr>> = None;

        for i in 0..self.max_depth {
            let sibling = FpVar::<Fr>::new_witness(ark_relations::ns!(cs, "sibling"), || {
                self.siblings[i].ok_or(SynthesisError::AssignmentMissing)
            })?;
            let direction = Boolean::new_witness(ark_relations::ns!(cs, "direction"), || {
                self.directions[i].ok_or(SynthesisError::AssignmentMissing)
            })?;
            let active = Boolean::new_witness(ark_relations::ns!(cs, "active"), || {
                self.active[i].ok_or(SynthesisError::AssignmentMissing)
            })?;

            // Active levels form a prefix: active_i AND NOT active_{i-1} is false.
            if let Some(previous) = &previous_active {
                active
                    .and(&previous.not())?
                    .enforce_equal(&Boolean::FALSE)?;
            }
            active_levels += FpVar::from(active.clone());

            let sibling_right = hash_pair_var(cs.clone(), &acc, &sibling)?;
            let sibling_left = hash_pair_var(cs.clone(), &sibling, &acc)?;
            let hashed = FpVar::conditionally_select(&direction, &sibling_right, &sibling_left)?;
            acc = FpVar::conditionally_select(&active, &hashed, &acc)?;

            previous_active = Some(active);
        }

        active_levels.enforce_equal(&depth_var)?;
        acc.enforce_equal(&root_var)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// In-circuit counterpart of `registry::hasher::hash_pair`.
fn hash_pair_var(
    cs: ConstraintSystemRef<Fr>,
    left: &FpVar<Fr>,
    right: &FpVar<Fr>,
) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, poseidon_config());
    sponge.absorb(&FpVar::constant(Fr::from(MERKLE_NODE_DOMAIN)))?;
    sponge.absorb(left)?;
    sponge.absorb(right)?;
    let mut out = sponge.squeeze_field_elements(1)?;
    out.pop().ok_or(SynthesisError::Unsatisfiable)
}

/// In-circuit counterpart of `registry::hasher::hash_leaf`.
fn hash_leaf_var(cs: ConstraintSystemRef<Fr>, value: &FpVar<Fr>) -> Result<FpVar<Fr>, SynthesisError> {
    let mut sponge = PoseidonSpongeVar::new(cs, poseidon_config());
    sponge.absorb(&FpVar::constant(Fr::from(MERKLE_LEAF_DOMAIN)))?;
    sponge.absorb(value)?;
    let mut out = sponge.squeeze_field_elements(1)?;
    out.pop().ok_or(SynthesisError::Unsatisfiable)
}

/// The public input vector the Groth16 verifier expects.
pub fn public_inputs(root: &Fr, depth: usize) -> Vec<Fr> {
    vec![*root, Fr::from(depth as u64)]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
