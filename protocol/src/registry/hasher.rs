//! The Merkle tree's hash, shared with the membership circuit.
//!
//! Poseidon over BN254 Fr, width 4 (rate 3, capacity 1), `x^5` S-box, 8 full
//! and 56 partial rounds. Round constants and the MDS matrix come from the
//! Grain LFSR in `find_poseidon_ark_and_mds`, so they are reproducible from
//! the parameters alone.
//!
//! Two hashes, each one sponge and one permutation:
//!
//! ```text
//! leaf commitment  H(LEAF_DOMAIN, value)
//! internal node    H(NODE_DOMAIN, left, right)
//! ```
//!
//! The circuit does exactly the same with `PoseidonSpongeVar`; if the two
//! ever diverge, every proof fails to verify.
//!
//! The prover's witness is the leaf *value*, and the circuit commits to it
//! itself. Passing an internal node off as a leaf would need a value whose
//! leaf commitment equals a node hash, which is a cross-domain Poseidon
//! collision.

use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{
    find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge,
};
use ark_crypto_primitives::sponge::{CryptographicSponge, FieldBasedCryptographicSponge};
use ark_ff::{PrimeField, Zero};

use crate::config::{
    MERKLE_LEAF_DOMAIN, MERKLE_NODE_DOMAIN, POSEIDON_ALPHA, POSEIDON_CAPACITY,
    POSEIDON_FULL_ROUNDS, POSEIDON_PARTIAL_ROUNDS, POSEIDON_RATE,
};
use crate::crypto::hash::hash_to_field;

/// Poseidon parameters, generated once per process.
pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            Fr::MODULUS_BIT_SIZE as u64,
            POSEIDON_RATE,
            POSEIDON_FULL_ROUNDS as u64,
            POSEIDON_PARTIAL_ROUNDS as u64,
            0,
        );
        PoseidonConfig::new(
            POSEIDON_FULL_ROUNDS,
            POSEIDON_PARTIAL_ROUNDS,
            POSEIDON_ALPHA,
            mds,
            ark,
            POSEIDON_RATE,
            POSEIDON_CAPACITY,
        )
    })
}

/// Internal node `H(NODE_DOMAIN, left, right)`. Order matters.
pub fn hash_pair(left: &Fr, right: &Fr) -> Fr {
    let mut sponge = PoseidonSponge::new(poseidon_config());
    sponge.absorb(&Fr::from(MERKLE_NODE_DOMAIN));
    sponge.absorb(left);
    sponge.absorb(right);
    sponge.squeeze_native_field_elements(1)[0]
}

/// Leaf commitment `H(LEAF_DOMAIN, value)`: what sits at level 0 of the tree.
pub fn hash_leaf(value: &Fr) -> Fr {
    let mut sponge = PoseidonSponge::new(poseidon_config());
    sponge.absorb(&Fr::from(MERKLE_LEAF_DOMAIN));
    sponge.absorb(value);
    sponge.squeeze_native_field_elements(1)[0]
}

/// The filler used when a level has an odd number of nodes.
pub fn padding() -> Fr {
    Fr::zero()
}

/// Map a stored credential string onto its leaf value, the private input
/// of a membership proof. The tree stores [`hash_leaf`] of it.
pub fn leaf_for(credential: &str) -> Fr {
    hash_to_field(credential.as_bytes())
}
