//! # Credential Wallets
//!
//! Every successful registration mints one Ed25519 keypair bound to the
//! credential. The address is the Bech32 encoding (HRP `keyless`) of the
//! BLAKE3 hash of the public key, so it carries a checksum and reveals
//! nothing about the credential.
//!
//! ## Storage
//!
//! ```text
//! wallet:{address}              → Wallet (bincode)
//! credential:{c}:wallet         → address
//! ```
//!
//! The private key never touches the store in the clear. It is sealed with
//! AES-256-GCM under a key derived from the server's long-term secret
//! ([`WALLET_SEAL_CONTEXT`]), with the address as associated data so a
//! sealed key cannot be moved to another wallet record.

use std::sync::Arc;

use bech32::{Bech32, Hrp};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::config::{WALLET_HRP, WALLET_SEAL_CONTEXT};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
use crate::crypto::hash::domain_separated_hash;
use crate::crypto::KeyPair;
use crate::error::{AuthError, AuthResult};
use crate::storage::{keys, KeyedStore, StoreExt};

/// One credential's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    /// Ed25519 verifying key, hex.
    pub public_key: String,
    /// Hex of `nonce || ciphertext || tag` over the 32-byte signing key.
    pub sealed_private_key: String,
    pub credential_hash: String,
    pub merkle_root_at_creation: String,
    pub created_at: DateTime<Utc>,
}

/// Bech32 address for an Ed25519 verifying key.
pub fn address_for(public_key: &[u8]) -> AuthResult<String> {
    let hrp = Hrp::parse(WALLET_HRP).map_err(|e| AuthError::Internal(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, blake3::hash(public_key).as_bytes())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

/// Check that `address` is a well-formed wallet address.
pub fn validate_address(address: &str) -> AuthResult<()> {
    let (hrp, data) = bech32::decode(address)
        .map_err(|_| AuthError::Validation("malformed wallet address".into()))?;
    if hrp.as_str() != WALLET_HRP || data.len() != 32 {
        return Err(AuthError::Validation("not a keyless wallet address".into()));
    }
    Ok(())
}

/// Mints and looks up credential wallets.
pub struct WalletStore {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    seal_key: Zeroizing<[u8; 32]>,
}

impl WalletStore {
    pub fn new(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>, server_key: &KeyPair) -> Self {
        let seal_key = Zeroizing::new(domain_separated_hash(
            WALLET_SEAL_CONTEXT,
            &server_key.secret_bytes()[..],
        ));
        Self {
            store,
            clock,
            seal_key,
        }
    }

    /// Mint a wallet for `credential`.
    ///
    /// # Errors
    ///
    /// `Conflict` if the credential already has one.
    pub fn create_for(&self, credential: &str, merkle_root: &str) -> AuthResult<Wallet> {
        let index_key = keys::credential_wallet(credential);
        if self.store.get(&index_key)?.is_some() {
            return Err(AuthError::Conflict("credential already has a wallet".into()));
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();
        let address = address_for(&public_key)?;

        let secret = Zeroizing::new(signing_key.to_bytes());
        let sealed = encrypt_with_aad(&self.seal_key, &secret[..], address.as_bytes())?;

        let wallet = Wallet {
            address: address.clone(),
            public_key: hex::encode(public_key),
            sealed_private_key: hex::encode(sealed),
            credential_hash: credential.to_string(),
            merkle_root_at_creation: merkle_root.to_string(),
            created_at: self.clock.now(),
        };

        self.store.put_record(&keys::wallet(&address), &wallet, None)?;
        self.store.put_record(&index_key, &address, None)?;

        tracing::debug!(%address, "wallet minted");
        Ok(wallet)
    }

    pub fn get_by_credential(&self, credential: &str) -> AuthResult<Wallet> {
        let address: String = self
            .store
            .get_record(&keys::credential_wallet(credential))?
            .ok_or_else(|| AuthError::NotFound("no wallet for this credential".into()))?;
        self.get_by_address(&address)
    }

    pub fn get_by_address(&self, address: &str) -> AuthResult<Wallet> {
        validate_address(address)?;
        self.store
            .get_record(&keys::wallet(address))?
            .ok_or_else(|| AuthError::NotFound("wallet not found".into()))
    }

    /// Recover the wallet's signing key.
    pub fn unseal(&self, wallet: &Wallet) -> AuthResult<SigningKey> {
        let sealed = hex::decode(&wallet.sealed_private_key)
            .map_err(|_| AuthError::Internal("sealed key is not hex".into()))?;
        let secret = Zeroizing::new(decrypt_with_aad(
            &self.seal_key,
            &sealed,
            wallet.address.as_bytes(),
        )?);
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| AuthError::Internal("sealed key has wrong length".into()))?;
        let signing_key = SigningKey::from_bytes(&bytes);
        if hex::encode(signing_key.verifying_key().to_bytes()) != wallet.public_key {
            return Err(AuthError::Internal("sealed key does not match wallet".into()));
        }
        Ok(signing_key)
    }
}
