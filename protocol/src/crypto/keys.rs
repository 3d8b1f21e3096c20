//! # Key Management
//!
//! P-256 keypairs for KEYLESS challenge exchange and signing.
//!
//! One keypair does two jobs: ECDH against the peer's public point, and ECDSA
//! signing. The server's long-term key signs every ephemeral key it hands
//! out; clients sign the decrypted challenge with the key they registered.
//!
//! ## Why P-256?
//!
//! - Every browser ships it in WebCrypto. So does every secure enclave.
//! - ECDH and ECDSA on the same curve means one key format on the wire.
//! - `p256` from RustCrypto is constant-time and well reviewed.
//!
//! ## Encodings
//!
//! - Public keys: uncompressed SEC1, 65 bytes, `0x04 || x || y`. Compressed
//!   points are rejected so that one key has exactly one byte representation.
//! - Signatures: fixed-width `r || s`, 64 bytes. No DER.
//!
//! ## Security considerations
//!
//! - `p256::SecretKey` zeroizes itself on drop.
//! - Raw secret bytes only leave this module inside [`Zeroizing`] buffers.
//! - Key bytes are never logged.

use std::fmt;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use zeroize::Zeroizing;

use super::exchange::{derive_shared_secret, SharedSecret};
use super::hash::sha256_array;
use crate::config::{
    PRIVATE_KEY_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, UNCOMPRESSED_POINT_TAG,
};

/// Errors that can occur during key operations.
///
/// Messages never say why something failed. They end up in logs and HTTP
/// responses; key material must not.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key: not an uncompressed P-256 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding: expected {SIGNATURE_LENGTH} bytes r||s")]
    InvalidSignatureEncoding,

    #[error("signing failed")]
    SigningFailed,
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A P-256 keypair.
///
/// Used for both lifecycles the protocol cares about: the server's long-term
/// identity key, and the per-challenge ephemeral key that dies with its
/// challenge.
///
/// `KeyPair` does NOT implement `Serialize`. Persisting a private key should
/// be a deliberate act through [`KeyPair::secret_bytes`].
///
/// # Examples
///
/// ```
/// use keyless_auth::crypto::keys::KeyPair;
///
/// let kp = KeyPair::generate();
/// let msg = b"decrypted challenge";
/// let sig = kp.sign(msg).unwrap();
/// assert!(kp.public_key().verify(msg, &sig));
/// ```
pub struct KeyPair {
    secret: p256::SecretKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            secret: p256::SecretKey::random(&mut OsRng),
        }
    }

    /// Rebuild a keypair from a raw 32-byte big-endian scalar.
    ///
    /// Fails for zero and for values at or above the group order.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PRIVATE_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let secret = p256::SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { secret })
    }

    /// Rebuild a keypair from a hex-encoded scalar.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes =
            Zeroizing::new(hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?);
        Self::from_bytes(&bytes)
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.secret.public_key(),
        }
    }

    /// Export the raw scalar. The buffer wipes itself when dropped.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; PRIVATE_KEY_LENGTH]> {
        let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    /// Hex-encoded scalar, for writing key files. Wiped on drop.
    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.secret_bytes()[..]))
    }

    /// ECDH against `peer`.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        derive_shared_secret(&self.secret, peer)
    }

    /// Sign a 32-byte message digest, producing fixed-width `r || s`.
    ///
    /// ECDSA needs fresh randomness (or RFC 6979 determinism, which the
    /// RustCrypto signer uses) per signature. A failure here means the
    /// signer could not produce a valid `k`, which is terminal.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature, KeyError> {
        let signing_key = SigningKey::from(&self.secret);
        let sig: EcdsaSignature = signing_key
            .sign_prehash(digest)
            .map_err(|_| KeyError::SigningFailed)?;
        Ok(Signature::from_ecdsa(&sig))
    }

    /// Hash `message` with SHA-256 and sign the digest.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, KeyError> {
        self.sign_digest(&sha256_array(message))
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            secret: self.secret.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(pub={})", self.public_key().short_hex())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// A validated P-256 public point.
///
/// Construction always goes through curve validation, so holding a
/// `PublicKey` means holding a point that is on the curve and not the
/// identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: p256::PublicKey,
}

impl PublicKey {
    /// Canonical 65-byte uncompressed encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let point = self.inner.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out.copy_from_slice(point.as_bytes());
        out
    }

    /// Decode the canonical uncompressed encoding.
    ///
    /// Anything that is not exactly 65 bytes starting with `0x04`, or whose
    /// coordinates are not on the curve, is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != PUBLIC_KEY_LENGTH || bytes[0] != UNCOMPRESSED_POINT_TAG {
            return Err(KeyError::InvalidPublicKey);
        }
        let inner = p256::PublicKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Lowercase hex of the uncompressed encoding (130 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse [`to_hex`](Self::to_hex) output. An optional `0x` prefix is tolerated.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Verify `signature` over `message`. The SHA-256 digest is recomputed
    /// here; callers never pass digests in.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verify_digest(&sha256_array(message), signature)
    }

    /// Verify `signature` over an already computed digest.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &Signature) -> bool {
        let Ok(sig) = signature.to_ecdsa() else {
            return false;
        };
        VerifyingKey::from(&self.inner)
            .verify_prehash(digest, &sig)
            .is_ok()
    }

    pub(crate) fn as_p256(&self) -> &p256::PublicKey {
        &self.inner
    }

    fn short_hex(&self) -> String {
        // Skip the 0x04 tag so the prefix actually distinguishes keys.
        self.to_hex()[2..18].to_string()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.short_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// An ECDSA P-256 signature as fixed-width `r || s`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl Signature {
    /// Wrap raw `r || s` bytes. Range checks on `r` and `s` happen at
    /// verification time, where a bad value simply fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; SIGNATURE_LENGTH] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidSignatureEncoding)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidSignatureEncoding)?;
        Self::from_bytes(&bytes)
    }

    fn from_ecdsa(sig: &EcdsaSignature) -> Self {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes.copy_from_slice(&sig.to_bytes());
        Self { bytes }
    }

    fn to_ecdsa(self) -> Result<EcdsaSignature, KeyError> {
        EcdsaSignature::from_slice(&self.bytes).map_err(|_| KeyError::InvalidSignatureEncoding)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = KeyPair::generate();
        let msg = b"challenge payload";
        let sig = kp.sign(msg).unwrap();
        assert!(kp.public_key().verify(msg, &sig));
    }

    #[test]
    fn verify_rejects_other_message() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"one").unwrap();
        assert!(!kp.public_key().verify(b"two", &sig));
    }

    #[test]
    fn verify_rejects_other_key() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let sig = a.sign(b"msg").unwrap();
        assert!(!b.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn sign_digest_matches_sign() {
        let kp = KeyPair::generate();
        let msg = b"prehashed";
        let sig = kp.sign_digest(&sha256_array(msg)).unwrap();
        assert!(kp.public_key().verify(msg, &sig));
    }

    #[test]
    fn public_key_encoding_is_uncompressed() {
        let kp = KeyPair::generate();
        let bytes = kp.public_key().to_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LENGTH);
        assert_eq!(bytes[0], UNCOMPRESSED_POINT_TAG);
        let decoded = PublicKey::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, kp.public_key());
    }

    #[test]
    fn public_key_hex_tolerates_prefix() {
        let pk = KeyPair::generate().public_key();
        let with_prefix = format!("0x{}", pk.to_hex());
        assert_eq!(PublicKey::from_hex(&with_prefix).unwrap(), pk);
    }

    #[test]
    fn off_curve_point_rejected() {
        let mut bytes = KeyPair::generate().public_key().to_bytes();
        // Nudging y moves the point off the curve.
        bytes[64] ^= 0x01;
        assert_eq!(PublicKey::from_bytes(&bytes), Err(KeyError::InvalidPublicKey));
    }

    #[test]
    fn compressed_point_rejected() {
        let pk = KeyPair::generate().public_key();
        let compressed = pk.as_p256().to_encoded_point(true);
        assert_eq!(
            PublicKey::from_bytes(compressed.as_bytes()),
            Err(KeyError::InvalidPublicKey)
        );
    }

    #[test]
    fn wrong_length_rejected() {
        assert_eq!(PublicKey::from_bytes(&[0x04; 10]), Err(KeyError::InvalidPublicKey));
        assert_eq!(PublicKey::from_bytes(&[]), Err(KeyError::InvalidPublicKey));
    }

    #[test]
    fn secret_roundtrip_through_hex() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_hex(&kp.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(matches!(
            KeyPair::from_bytes(&[0u8; 32]),
            Err(KeyError::InvalidSecretKey)
        ));
    }

    #[test]
    fn signature_length_enforced() {
        assert_eq!(
            Signature::from_bytes(&[1u8; 63]),
            Err(KeyError::InvalidSignatureEncoding)
        );
    }

    #[test]
    fn garbage_signature_fails_cleanly() {
        let kp = KeyPair::generate();
        let sig = Signature::from_bytes(&[0u8; 64]).unwrap();
        assert!(!kp.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{kp:?}");
        let secret_hex = kp.secret_hex();
        assert!(!debug.contains(secret_hex.as_str()));
        assert!(debug.starts_with("KeyPair(pub="));
    }

    #[test]
    fn public_key_serde_as_hex_string() {
        let pk = KeyPair::generate().public_key();
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", pk.to_hex()));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }
}
