//! # Zero-Knowledge Membership Module
//!
//! Groth16 over BN254 proving that a private leaf sits in the credential
//! tree under a public root, without revealing the leaf or its position.
//!
//! ## Architecture
//!
//! ```text
//! witness.rs  : MembershipWitness: parsing and the off-circuit fold check
//! circuit.rs  : R1CS circuit (MembershipCircuit), fixed max depth
//! prover.rs   : Groth16 setup and proving (MembershipProver, MembershipProof)
//! verifier.rs : Groth16 verification (MembershipVerifier)
//! ```
//!
//! ## Statement
//!
//! ```text
//! "I know a leaf value and a path of exactly `depth` levels such that
//!  committing to the value and folding it through the path with Poseidon
//!  gives `root`."
//! ```
//!
//! `root` and `depth` are the public inputs. The circuit is compiled for a
//! fixed `max_depth`; shorter paths are padded and masked with per-level
//! `active` bits, so one key pair serves every tree up to `2^max_depth`
//! leaves.
//!
//! ## Security Model
//!
//! - **Soundness**: Groth16 knowledge-soundness in the generic group model.
//! - **Zero knowledge**: the proof reveals nothing beyond `root` and the
//!   tree depth, which anyone holding the root's leaf count knows anyway.
//! - **Leaf binding**: the circuit commits to the leaf value under its own
//!   domain tag, so neither the root nor an internal node passes as a leaf.
//! - **Setup**: local, per process. A deployment that needs third parties to
//!   trust the verifying key should run a ceremony and load the keys instead.

pub mod circuit;
pub mod prover;
pub mod verifier;
pub mod witness;

use thiserror::Error;

pub use circuit::MembershipCircuit;
pub use prover::{MembershipProof, MembershipProver};
pub use verifier::MembershipVerifier;
pub use witness::MembershipWitness;

/// Failures of the membership proving system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZkError {
    /// Malformed witness material: bad field encoding, mismatched lengths,
    /// direction values other than 0 or 1.
    #[error("invalid witness: {0}")]
    Witness(String),

    /// The witness is well formed but does not hash to the claimed root.
    #[error("witness does not satisfy the membership constraints")]
    ConstraintUnsatisfied,

    /// The path is longer than the circuit was compiled for.
    #[error("path depth {depth} exceeds circuit depth {max_depth}")]
    DepthExceeded { depth: usize, max_depth: usize },

    #[error("circuit setup failed: {0}")]
    Setup(String),

    #[error("proof generation failed: {0}")]
    Proving(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}
