//! Client half of the challenge exchange.
//!
//! Used by the CLI, the benches and the tests; a browser client does the
//! same four steps with WebCrypto.

use super::record::{ChallengeAnswer, IssuedChallenge};
use crate::crypto::{decrypt, KeyPair, PublicKey};
use crate::error::{AuthError, AuthResult, CryptoError};

/// Answer `issued` as `user`.
///
/// 1. Check the server's signature over the ephemeral key.
/// 2. Derive the shared secret and compare its hash with `hashed_shared_key`.
/// 3. Decrypt the payload.
/// 4. Sign the plaintext.
pub fn respond_to_challenge(
    user: &KeyPair,
    server_public_key: &PublicKey,
    issued: &IssuedChallenge,
) -> AuthResult<ChallengeAnswer> {
    if !server_public_key.verify(
        &issued.ephemeral_public_key.to_bytes(),
        &issued.server_signature,
    ) {
        return Err(CryptoError::InvalidSignature.into());
    }

    let secret = user.diffie_hellman(&issued.ephemeral_public_key);
    if secret.hashed_hex() != issued.hashed_shared_key {
        return Err(CryptoError::ChallengeFailed.into());
    }

    let ciphertext = hex::decode(&issued.ciphered_payload)
        .map_err(|_| AuthError::Validation("ciphered payload is not hex".into()))?;
    let plaintext = decrypt(&secret.aead_key(), &ciphertext)?;
    let decrypted_payload = String::from_utf8(plaintext)
        .map_err(|_| AuthError::Validation("challenge payload is not UTF-8".into()))?;

    let signature = user.sign(decrypted_payload.as_bytes())?;

    Ok(ChallengeAnswer {
        claimant_public_key: user.public_key(),
        decrypted_payload,
        signature,
        ephemeral_public_key: issued.ephemeral_public_key.clone(),
    })
}
