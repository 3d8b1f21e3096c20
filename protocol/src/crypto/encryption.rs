//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for KEYLESS. Challenge payloads travel under it,
//! and wallet private keys are sealed with it at rest.
//!
//! AES-GCM is an AEAD: a wrong key or a flipped bit fails the tag check and
//! yields an error, never partial or garbage plaintext.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS RNG, one per encryption. Challenge keys
//! are single-use, so the birthday bound is not a practical concern there.
//! The wallet seal key encrypts one record per credential.
//!
//! ## Wire format
//!
//! `nonce (12) || ciphertext || tag (16)` as one buffer. Clients decrypt with
//! WebCrypto, which wants the nonce separately; slicing off the first twelve
//! bytes is all they need to do.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

use super::exchange::generate_nonce;
use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// "Wrong key" and "tampered ciphertext" are the same error to the outside
/// world.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// ```
/// use keyless_auth::crypto::encryption::{decrypt, encrypt};
///
/// let key = [0x42u8; 32];
/// let sealed = encrypt(&key, b"challenge").unwrap();
/// assert_eq!(decrypt(&key, &sealed).unwrap(), b"challenge");
/// ```
pub fn encrypt(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypt `nonce || ciphertext` produced by [`encrypt`].
pub fn decrypt(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    decrypt_with_aad(key, data, &[])
}

/// Encrypt with additional authenticated data.
///
/// The AAD is authenticated but not encrypted, and must be presented again
/// on decryption. Wallet sealing binds the sealed key to the wallet address
/// this way, so a sealed blob cannot be swapped onto another wallet record.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;
    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext` produced by [`encrypt_with_aad`].
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| EncryptionError::DecryptionFailed)
}
