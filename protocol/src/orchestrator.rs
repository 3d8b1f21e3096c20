//! # Auth Orchestrator
//!
//! The three user-facing flows, composed from the components underneath:
//!
//! ```text
//! register   hashed credential ─▶ registry.register ─▶ wallet ─▶ receipt
//! challenge  public key ─▶ sessions.issue / sessions.verify ─▶ identity
//! membership witness ─▶ off-circuit fold ─▶ Groth16 prove / verify
//! ```
//!
//! An orchestrator owns no state of its own beyond `Arc`s to its parts, so
//! one instance is shared by every request handler.
//!
//! Register then wallet is not transactional. If minting the wallet fails
//! the credential stays registered without one; a retry returns `Conflict`.
//! [`AuthOrchestrator::wallet_for_credential`] reports `NotFound` for such a
//! credential.

use std::sync::Arc;

use ark_std::rand::{CryptoRng, Rng};
use rand::rngs::OsRng;

use crate::clock::Clock;
use crate::config::{AuthConfig, HASHED_CREDENTIAL_HEX_LENGTH};
use crate::crypto::hash::{field_from_hex, field_to_hex};
use crate::crypto::{KeyPair, PublicKey, Signature};
use crate::error::{AuthError, AuthResult};
use crate::registry::{CredentialRegistry, InclusionProof, TreeSummary};
use crate::session::{ChallengeSessionStore, IdentityRecord, IssuedChallenge};
use crate::storage::KeyedStore;
use crate::wallet::{Wallet, WalletStore};
use crate::zkp::{MembershipProof, MembershipProver, MembershipVerifier, MembershipWitness};

/// What a successful registration hands back.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistrationReceipt {
    pub merkle_root: String,
    pub wallet_address: String,
    pub proof: InclusionProof,
    pub leaf: String,
}

/// Composes registry, sessions, wallets and the membership circuit.
#[derive(Clone)]
pub struct AuthOrchestrator {
    registry: Arc<CredentialRegistry>,
    sessions: Arc<ChallengeSessionStore>,
    wallets: Arc<WalletStore>,
    prover: MembershipProver,
    verifier: Arc<MembershipVerifier>,
    config: AuthConfig,
}

impl AuthOrchestrator {
    /// Wire everything up and run the circuit setup.
    ///
    /// Setup is the expensive part; it scales with `config.max_tree_depth`.
    pub fn new<R: Rng + CryptoRng>(
        store: Arc<dyn KeyedStore>,
        clock: Arc<dyn Clock>,
        server_key: KeyPair,
        config: AuthConfig,
        rng: &mut R,
    ) -> AuthResult<Self> {
        config.validate().map_err(AuthError::Validation)?;

        let (prover, verifier) = MembershipProver::setup(config.max_tree_depth, rng)?;
        let server_key = Arc::new(server_key);

        Ok(Self {
            registry: Arc::new(CredentialRegistry::new(
                store.clone(),
                clock.clone(),
                CredentialRegistry::capacity_for_depth(config.max_tree_depth),
            )),
            sessions: Arc::new(ChallengeSessionStore::new(
                store.clone(),
                clock.clone(),
                server_key.clone(),
                &config,
            )),
            wallets: Arc::new(WalletStore::new(store, clock, &server_key)),
            prover,
            verifier: Arc::new(verifier),
            config,
        })
    }

    /// [`new`](Self::new) with the circuit setup drawing on the OS RNG.
    pub fn from_entropy(
        store: Arc<dyn KeyedStore>,
        clock: Arc<dyn Clock>,
        server_key: KeyPair,
        config: AuthConfig,
    ) -> AuthResult<Self> {
        Self::new(store, clock, server_key, config, &mut OsRng)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn registry(&self) -> &CredentialRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &ChallengeSessionStore {
        &self.sessions
    }

    pub fn verifier(&self) -> &MembershipVerifier {
        &self.verifier
    }

    pub fn server_public_key(&self) -> PublicKey {
        self.sessions.server_public_key()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a hashed credential and mint its wallet.
    ///
    /// The credential must be 64 hex characters (the output of
    /// [`crate::crypto::hash_credential`]). Upper-case input is folded to
    /// lower case before anything is stored.
    pub fn register_credential(&self, hashed_credential: &str) -> AuthResult<RegistrationReceipt> {
        let credential = normalize_credential(hashed_credential)?;

        if self.registry.exists(&credential)? {
            return Err(AuthError::duplicate_credential());
        }

        // Duplicate and capacity checks are repeated under the registry lock.
        let registration = self.registry.register(&credential)?;
        let wallet = self
            .wallets
            .create_for(&credential, &registration.proof.root)
            .map_err(|err| {
                tracing::error!(
                    leaf_index = registration.leaf_index,
                    error = %err,
                    "credential registered but wallet minting failed"
                );
                err
            })?;

        tracing::info!(
            leaf_index = registration.leaf_index,
            root = %registration.proof.root,
            wallet = %wallet.address,
            "credential registered"
        );

        Ok(RegistrationReceipt {
            merkle_root: registration.proof.root.clone(),
            wallet_address: wallet.address,
            leaf: registration.proof.leaf.clone(),
            proof: registration.proof,
        })
    }

    // -----------------------------------------------------------------------
    // Challenge / response
    // -----------------------------------------------------------------------

    pub fn issue_challenge(&self, public_key: &str) -> AuthResult<IssuedChallenge> {
        let user = parse_public_key(public_key)?;
        self.sessions.issue_challenge(&user)
    }

    pub fn verify_challenge(
        &self,
        claimant_public_key: &str,
        decrypted_payload: &str,
        signature: &str,
        ephemeral_public_key: &str,
    ) -> AuthResult<IdentityRecord> {
        if decrypted_payload.is_empty() {
            return Err(AuthError::Validation("decrypted payload must not be empty".into()));
        }
        let user = parse_public_key(claimant_public_key)?;
        let ephemeral = parse_public_key(ephemeral_public_key)?;
        let signature = Signature::from_hex(signature)
            .map_err(|_| AuthError::Validation("signature must be 64 bytes r||s in hex".into()))?;
        self.sessions
            .verify_response(&user, decrypted_payload, &signature, &ephemeral)
    }

    pub fn resolve_session(&self, token: &str) -> AuthResult<IdentityRecord> {
        self.sessions.resolve_session(token)
    }

    // -----------------------------------------------------------------------
    // Membership proofs
    // -----------------------------------------------------------------------

    /// Prove that `leaf` folds to `root` along the given path.
    ///
    /// The fold is recomputed off-circuit first; a witness that does not
    /// land on `root` is rejected with `Constraint` before proving starts.
    pub fn generate_membership_proof(
        &self,
        leaf: &str,
        root: &str,
        siblings: &[String],
        directions: &[u8],
    ) -> AuthResult<MembershipProof> {
        let witness = MembershipWitness::from_hex(leaf, root, siblings, directions)?;
        self.prove(&witness)
    }

    /// [`generate_membership_proof`](Self::generate_membership_proof) on
    /// the blocking pool, for callers on an async runtime.
    pub async fn generate_membership_proof_async(
        &self,
        leaf: String,
        root: String,
        siblings: Vec<String>,
        directions: Vec<u8>,
    ) -> AuthResult<MembershipProof> {
        let witness = MembershipWitness::from_hex(&leaf, &root, &siblings, &directions)?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.prove(&witness))
            .await
            .map_err(|e| AuthError::Internal(format!("proving task failed: {e}")))?
    }

    /// Check a proof against `root`. A well-formed proof for another root,
    /// or for a root this registry never produced, is `Ok(false)`.
    pub fn verify_membership_proof(&self, proof_hex: &str, root: &str) -> AuthResult<bool> {
        let root = field_from_hex(root)
            .map_err(|e| AuthError::Validation(format!("root: {e}")))?;
        let proof = MembershipProof::from_hex(proof_hex)
            .map_err(|e| AuthError::Validation(e.to_string()))?;
        let Some(depth) = self.registry.depth_of_root(&root)? else {
            tracing::debug!(root = %field_to_hex(&root), "membership proof for unknown root");
            return Ok(false);
        };
        Ok(self.verifier.verify(&proof, &root, depth)?)
    }

    fn prove(&self, witness: &MembershipWitness) -> AuthResult<MembershipProof> {
        let started = std::time::Instant::now();
        let proof = self.prover.prove(witness)?;
        tracing::debug!(
            depth = witness.depth(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "membership proof generated"
        );
        Ok(proof)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn merkle_root(&self) -> AuthResult<TreeSummary> {
        self.registry.summary()
    }

    pub fn merkle_root_hex(&self) -> AuthResult<String> {
        Ok(field_to_hex(&self.registry.summary()?.root))
    }

    pub fn wallet_for_credential(&self, hashed_credential: &str) -> AuthResult<Wallet> {
        let credential = normalize_credential(hashed_credential)?;
        self.wallets.get_by_credential(&credential)
    }

    /// A fresh inclusion proof for an already registered credential.
    pub fn inclusion_proof_for(&self, hashed_credential: &str) -> AuthResult<InclusionProof> {
        let credential = normalize_credential(hashed_credential)?;
        let index = self.registry.index_of(&credential)?;
        self.registry.generate_proof(index)
    }

    /// Sweep expired challenges and sessions.
    pub fn prune_expired(&self) -> AuthResult<usize> {
        self.sessions.prune_expired()
    }
}

fn normalize_credential(raw: &str) -> AuthResult<String> {
    let credential = raw.trim().to_ascii_lowercase();
    if credential.len() != HASHED_CREDENTIAL_HEX_LENGTH
        || !credential.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(AuthError::Validation(format!(
            "hashed credential must be {HASHED_CREDENTIAL_HEX_LENGTH} hex characters"
        )));
    }
    Ok(credential)
}

fn parse_public_key(hex: &str) -> AuthResult<PublicKey> {
    PublicKey::from_hex(hex).map_err(|_| {
        AuthError::Validation("public key must be a 65-byte uncompressed P-256 point".into())
    })
}
