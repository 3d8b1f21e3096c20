//! # ECDH Key Exchange
//!
//! Shared-secret derivation between a server ephemeral key and a client's
//! long-term key.
//!
//! Every challenge gets a fresh server keypair. The server multiplies the
//! client's public point by the ephemeral scalar, the client multiplies the
//! ephemeral public point by its own scalar, and both land on the same
//! x-coordinate. Once the challenge resolves the ephemeral scalar is wiped,
//! so a later compromise of the server's long-term key does not reopen old
//! challenges.
//!
//! ## Key Derivation
//!
//! The raw x-coordinate is NOT used as an AES key. It is run through BLAKE3
//! `derive_key` with a fixed context ([`CHALLENGE_KEY_CONTEXT`]) first. The
//! raw secret is also hashed with SHA-256 into `hashedSharedKey`, which the
//! client compares against its own derivation to detect a mismatched key
//! before attempting decryption.

use p256::ecdh::diffie_hellman;
use rand::RngCore;
use zeroize::Zeroizing;

use super::hash::{domain_separated_hash, sha256_array};
use super::keys::PublicKey;
use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, CHALLENGE_KEY_CONTEXT, SHARED_SECRET_LENGTH};

/// Raw ECDH output. Wiped on drop.
pub struct SharedSecret {
    bytes: Zeroizing<[u8; SHARED_SECRET_LENGTH]>,
}

impl SharedSecret {
    /// The raw x-coordinate. Prefer [`aead_key`](Self::aead_key) for
    /// anything that encrypts.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LENGTH] {
        &self.bytes
    }

    /// AES-256 key derived from this secret.
    pub fn aead_key(&self) -> Zeroizing<[u8; AES_KEY_LENGTH]> {
        Zeroizing::new(domain_separated_hash(CHALLENGE_KEY_CONTEXT, &self.bytes[..]))
    }

    /// `hex(SHA-256(secret))`, the value both sides can publish to confirm
    /// they derived the same secret without revealing it.
    pub fn hashed_hex(&self) -> String {
        hash_shared_secret(self)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Scalar-multiply `peer` by `secret` and keep the affine x-coordinate.
///
/// Symmetric: `derive(a, B) == derive(b, A)`.
pub fn derive_shared_secret(secret: &p256::SecretKey, peer: &PublicKey) -> SharedSecret {
    let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_p256().as_affine());
    let mut bytes = Zeroizing::new([0u8; SHARED_SECRET_LENGTH]);
    bytes.copy_from_slice(shared.raw_secret_bytes());
    SharedSecret { bytes }
}

/// `hex(SHA-256(secret))`. What a server publishes as `hashedSharedKey`.
pub fn hash_shared_secret(secret: &SharedSecret) -> String {
    hex::encode(sha256_array(&secret.bytes[..]))
}

/// A fresh 96-bit AEAD nonce from the OS RNG.
pub fn generate_nonce() -> [u8; AES_NONCE_LENGTH] {
    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// `len` random bytes, hex encoded. Challenge payloads and session tokens.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
