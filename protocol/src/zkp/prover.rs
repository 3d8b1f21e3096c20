//! # Groth16 Proof Generation
//!
//! The workflow is:
//!
//! 1. **Setup**: `MembershipProver::setup(max_depth, rng)` once per process.
//!    Produces the proving key and, as [`MembershipVerifier`], the verifying
//!    key. Both are immutable afterwards and shared through `Arc`.
//!
//! 2. **Prove**: `MembershipProver::prove(&witness)` checks the witness
//!    off-circuit, pads it to `max_depth` and runs `Groth16::prove`. The
//!    path length travels with the proof's statement as the `depth` input.
//!
//! 3. The resulting [`MembershipProof`] is a compact serializable blob
//!    (compressed arkworks encoding) that travels to the verifier as hex.

use std::sync::Arc;

use ark_bn254::Bn254;
use ark_groth16::{Groth16, ProvingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;
use ark_std::rand::{CryptoRng, Rng};

use super::circuit::MembershipCircuit;
use super::verifier::MembershipVerifier;
use super::witness::MembershipWitness;
use super::ZkError;

// ---------------------------------------------------------------------------
// MembershipProver
// ---------------------------------------------------------------------------

/// Holds the Groth16 proving key for one circuit depth.
///
/// Cloning is cheap; the key lives behind an `Arc`.
#[derive(Clone)]
pub struct MembershipProver {
    pk: Arc<ProvingKey<Bn254>>,
    max_depth: usize,
}

impl MembershipProver {
    /// Run the Groth16 setup for a circuit of `max_depth` levels.
    pub fn setup<R: Rng + CryptoRng>(
        max_depth: usize,
        rng: &mut R,
    ) -> Result<(Self, MembershipVerifier), ZkError> {
        let started = std::time::Instant::now();
        let (pk, vk) =
            Groth16::<Bn254>::circuit_specific_setup(MembershipCircuit::blank(max_depth), rng)
                .map_err(|e| ZkError::Setup(e.to_string()))?;

        tracing::info!(
            max_depth,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "membership circuit keys generated"
        );

        let verifier = MembershipVerifier::from_vk(vk, max_depth);
        Ok((
            Self {
                pk: Arc::new(pk),
                max_depth,
            },
            verifier,
        ))
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Generate a membership proof.
    ///
    /// # Errors
    ///
    /// - [`ZkError::ConstraintUnsatisfied`] if the witness does not fold to
    ///   its root. Checked before proving.
    /// - [`ZkError::DepthExceeded`] if the path is longer than the circuit.
    /// - [`ZkError::Proving`] / [`ZkError::Serialization`] on arkworks failure.
    pub fn prove(&self, witness: &MembershipWitness) -> Result<MembershipProof, ZkError> {
        witness.check()?;
        self.prove_circuit(MembershipCircuit::from_witness(witness, self.max_depth)?)
    }

    /// Run Groth16 on an already populated circuit, with no off-circuit check.
    pub(super) fn prove_circuit(
        &self,
        circuit: MembershipCircuit,
    ) -> Result<MembershipProof, ZkError> {
        let mut rng = ark_std::rand::thread_rng();
        let proof = Groth16::<Bn254>::prove(&self.pk, circuit, &mut rng)
            .map_err(|e| ZkError::Proving(e.to_string()))?;

        let mut bytes = Vec::new();
        proof
            .serialize_compressed(&mut bytes)
            .map_err(|e| ZkError::Serialization(e.to_string()))?;

        Ok(MembershipProof { bytes })
    }
}

// ---------------------------------------------------------------------------
// MembershipProof
// ---------------------------------------------------------------------------

/// A serialized Groth16 proof of membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipProof {
    bytes: Vec<u8>,
}

impl MembershipProof {
    /// Raw compressed proof bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Reconstruct a proof from compressed bytes. The bytes must decode.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ZkError> {
        ark_groth16::Proof::<Bn254>::deserialize_compressed(data)
            .map_err(|e| ZkError::Serialization(format!("invalid Groth16 proof bytes: {e}")))?;
        Ok(Self {
            bytes: data.to_vec(),
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, ZkError> {
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| ZkError::Witness("proof is not valid hex".into()))?;
        Self::from_bytes(&bytes)
    }

    pub(crate) fn to_ark_proof(&self) -> Result<ark_groth16::Proof<Bn254>, ZkError> {
        ark_groth16::Proof::<Bn254>::deserialize_compressed(&self.bytes[..])
            .map_err(|e| ZkError::Serialization(e.to_string()))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
