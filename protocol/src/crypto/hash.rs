//! # Hashing Utilities
//!
//! Hash functions used throughout KEYLESS. Three families, each with a job:
//!
//! - **SHA-256**: the client-facing hash. Signature digests, the
//!   `hashedSharedKey` a client compares against, and hashed credentials are
//!   all SHA-256 because that is what WebCrypto gives a browser for free.
//!
//! - **BLAKE3**: server-internal. Key derivation (`derive_key` mode) and
//!   mapping credentials onto the BN254 scalar field.
//!
//! - **Poseidon**: lives in [`crate::registry::hasher`], because it is a
//!   property of the Merkle tree and the circuit rather than a general tool.
//!
//! ## Field element encoding
//!
//! Field elements cross the wire as 64 lowercase hex characters, big-endian.
//! Decoding is strict: a value at or above the field modulus is rejected
//! instead of being silently reduced, so every element has exactly one text
//! form and the witness a client submits is bit-exact with what the registry
//! produced.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::CREDENTIAL_SALT;

/// Errors when decoding a field element from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldEncodingError {
    #[error("field element is not valid hex")]
    InvalidHex,

    #[error("field element must be 32 bytes, got {0}")]
    WrongLength(usize),

    #[error("field element is not below the BN254 scalar modulus")]
    NonCanonical,
}

/// SHA-256 of `data`.
///
/// ```
/// use keyless_auth::crypto::sha256;
///
/// let hash = sha256(b"KEYLESS");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Vec<u8> {
    sha256_array(data).to_vec()
}

/// SHA-256 of `data` as a fixed-size array.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// BLAKE3 of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// BLAKE3 in `derive_key` mode.
///
/// The context string selects a different internal IV, so outputs under two
/// contexts never collide even for identical input. Used for turning ECDH
/// output into AEAD keys and for the wallet seal key.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Map arbitrary bytes onto a BN254 scalar field element.
///
/// BLAKE3 the input, read the digest as a little-endian integer, reduce mod
/// `r`. The bias from reducing 256 bits into a ~254-bit field is negligible.
///
/// ```
/// use keyless_auth::crypto::hash::hash_to_field;
///
/// let a = hash_to_field(b"credential");
/// assert_eq!(a, hash_to_field(b"credential"));
/// ```
pub fn hash_to_field(data: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(&blake3_hash(data))
}

/// The canonical hashed-credential form clients register.
///
/// `hex(SHA-256(salt || raw))`. Clients hash first and hex-encode second;
/// the server stores the resulting string verbatim and never sees `raw`.
pub fn hash_credential(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CREDENTIAL_SALT);
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

/// Encode a field element as 64 lowercase big-endian hex characters.
pub fn field_to_hex(value: &Fr) -> String {
    let bytes = value.into_bigint().to_bytes_be();
    // to_bytes_be is already 32 bytes for BN254; left-pad anyway so the
    // width never depends on the limb count.
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    hex::encode(out)
}

/// Decode [`field_to_hex`] output, rejecting non-canonical values.
pub fn field_from_hex(s: &str) -> Result<Fr, FieldEncodingError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s).to_ascii_lowercase();
    let bytes = hex::decode(&s).map_err(|_| FieldEncodingError::InvalidHex)?;
    if bytes.len() != 32 {
        return Err(FieldEncodingError::WrongLength(bytes.len()));
    }
    let value = Fr::from_be_bytes_mod_order(&bytes);
    // Reduction is only the identity for values below the modulus.
    if field_to_hex(&value) != s {
        return Err(FieldEncodingError::NonCanonical);
    }
    Ok(value)
}
