//! # Groth16 Proof Verification
//!
//! The verifier side of the membership proof. Holds only the verifying key,
//! which is small and safe to hand to anyone who wants to check proofs
//! against a published root.
//!
//! Verification is three pairings plus a two-element multi-scalar
//! multiplication, constant time in the tree size. The caller supplies the
//! depth of the tree that produced `root`; the registry records it per root.

use ark_bn254::{Bn254, Fr};
use ark_groth16::{Groth16, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;

use super::circuit;
use super::prover::MembershipProof;
use super::ZkError;

// ---------------------------------------------------------------------------
// MembershipVerifier
// ---------------------------------------------------------------------------

/// Holds the Groth16 verifying key for the membership circuit.
#[derive(Clone)]
pub struct MembershipVerifier {
    vk: VerifyingKey<Bn254>,
    max_depth: usize,
}

impl MembershipVerifier {
    pub(crate) fn from_vk(vk: VerifyingKey<Bn254>, max_depth: usize) -> Self {
        Self { vk, max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Check `proof` against `root` for a tree of `depth` levels.
    ///
    /// `Ok(false)` means the proof is well formed but not for this root and
    /// depth (or not valid at all). `Err` means the proof bytes do not decode.
    pub fn verify(&self, proof: &MembershipProof, root: &Fr, depth: usize) -> Result<bool, ZkError> {
        if depth > self.max_depth {
            return Ok(false);
        }
        let ark_proof = proof.to_ark_proof()?;
        let inputs = circuit::public_inputs(root, depth);
        // A malformed proof can fail inside the pairing check rather than
        // return false. Either way it did not verify.
        Ok(Groth16::<Bn254>::verify(&self.vk, &inputs, &ark_proof)
            .unwrap_or(false))
    }

    /// Compressed verifying key, for publishing alongside the root.
    pub fn vk_to_bytes(&self) -> Result<Vec<u8>, ZkError> {
        let mut buf = Vec::new();
        self.vk
            .serialize_compressed(&mut buf)
            .map_err(|e| ZkError::Serialization(e.to_string()))?;
        buf.extend_from_slice(&(self.max_depth as u32).to_le_bytes());
        Ok(buf)
    }

    pub fn vk_from_bytes(data: &[u8]) -> Result<Self, ZkError> {
        let split = data
            .len()
            .checked_sub(4)
            .ok_or_else(|| ZkError::Serialization("verifying key too short".into()))?;
        let (key, depth) = data.split_at(split);
        let mut depth_bytes = [0u8; 4];
        depth_bytes.copy_from_slice(depth);

        let vk = VerifyingKey::<Bn254>::deserialize_compressed(key)
            .map_err(|e| ZkError::Serialization(format!("invalid verifying key: {e}")))?;
        Ok(Self::from_vk(vk, u32::from_le_bytes(depth_bytes) as usize))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::hasher::leaf_for;
    use crate::registry::{InclusionProof, MerkleTree};
    use crate::zkp::{MembershipProver, MembershipWitness};
    use ark_std::rand::{rngs::StdRng, SeedableRng};

    const DEPTH: usize = 3;

    fn setup() -> (MembershipProver, MembershipVerifier, MerkleTree) {
        let mut rng = StdRng::seed_from_u64(42);
        let (prover, verifier) = MembershipProver::setup(DEPTH, &mut rng).unwrap();
        let tree = MerkleTree::build((0..5).map(|k| leaf_for(&format!("v{k}"))).collect());
        (prover, verifier, tree)
    }

    fn prove(prover: &MembershipProver, tree: &MerkleTree, i: usize) -> MembershipProof {
        let inclusion = InclusionProof::from_tree(tree, i).unwrap();
        prover
            .prove(&MembershipWitness::from_inclusion_proof(&inclusion).unwrap())
            .unwrap()
    }

    #[test]
    fn verify_valid_proof() {
        let (prover, verifier, tree) = setup();
        for i in 0..5 {
            let proof = prove(&prover, &tree, i);
            assert!(verifier.verify(&proof, &tree.root(), tree.depth()).unwrap(), "leaf {i}");
        }
    }

    #[test]
    fn reject_wrong_root() {
        let (prover, verifier, tree) = setup();
        let proof = prove(&prover, &tree, 0);
        assert!(!verifier.verify(&proof, &leaf_for("not a root"), tree.depth()).unwrap());
    }

    #[test]
    fn reject_wrong_depth() {
        let (prover, verifier, tree) = setup();
        let proof = prove(&prover, &tree, 2);
        for depth in [0, tree.depth() - 1, tree.depth() + 1, DEPTH + 1] {
            assert!(!verifier.verify(&proof, &tree.root(), depth).unwrap(), "depth {depth}");
        }
    }

    #[test]
    fn reject_proof_from_other_setup() {
        let (prover, _verifier, tree) = setup();
        let mut rng = StdRng::seed_from_u64(7);
        let (_, other_verifier) = MembershipProver::setup(DEPTH, &mut rng).unwrap();
        let proof = prove(&prover, &tree, 1);
        assert!(!other_verifier.verify(&proof, &tree.root(), tree.depth()).unwrap());
    }

    #[test]
    fn vk_serialization_round_trip() {
        let (prover, verifier, tree) = setup();
        let restored = MembershipVerifier::vk_from_bytes(&verifier.vk_to_bytes().unwrap()).unwrap();
        assert_eq!(restored.max_depth(), DEPTH);

        let proof = prove(&prover, &tree, 4);
        assert!(restored.verify(&proof, &tree.root(), tree.depth()).unwrap());
    }

    #[test]
    fn truncated_vk_rejected() {
        assert!(MembershipVerifier::vk_from_bytes(&[1, 2]).is_err());
    }
}
