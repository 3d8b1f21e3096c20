//! # Challenge Sessions
//!
//! Per-identity challenge state machine.
//!
//! ```text
//!   NoChallenge ──issue──▶ Issued ──verify ok──▶ Verified
//!                            │  ╲
//!                            │   ╲──bad answer──▶ Discarded (deleted)
//!                            ▼
//!                         Expired (TTL)
//! ```
//!
//! Only `Issued` and `Verified` are ever stored. A discarded record is
//! deleted along with its ephemeral key, which reads the same as no
//! challenge at all.
//!
//! - At most one active challenge per identity. Issuing again discards the
//!   previous one.
//! - A failed answer discards the record. There is no retry on the same
//!   challenge; the client asks for a new one.
//! - Issue and verify for one identity are serialized through a striped
//!   lock, so discard-then-create cannot interleave with a verification.
//! - Expiry is lazy. [`ChallengeSessionStore::prune_expired`] is the sweep.

pub mod client;
pub mod record;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::clock::{self, Clock};
use crate::config::{
    AuthConfig, CHALLENGE_PAYLOAD_LENGTH, IDENTITY_LOCK_STRIPES, SESSION_TOKEN_LENGTH,
};
use crate::crypto::{decrypt, encrypt, random_hex, KeyPair, PublicKey, Signature};
use crate::error::{AuthError, AuthResult, CryptoError};
use crate::storage::{keys, KeyedStore, StoreExt};

pub use client::respond_to_challenge;
pub use record::{
    ChallengeAnswer, ChallengeLogEntry, ChallengeRecord, ChallengeState, EphemeralSecret,
    IdentityRecord, IssuedChallenge,
};

/// Issues challenges and checks answers.
pub struct ChallengeSessionStore {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    server_key: Arc<KeyPair>,
    challenge_ttl: Duration,
    session_ttl: Duration,
    stripes: Box<[Mutex<()>]>,
}

impl ChallengeSessionStore {
    pub fn new(
        store: Arc<dyn KeyedStore>,
        clock: Arc<dyn Clock>,
        server_key: Arc<KeyPair>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            clock,
            server_key,
            challenge_ttl: config.challenge_ttl,
            session_ttl: config.session_ttl,
            stripes: (0..IDENTITY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The long-term public key clients use to check ephemeral keys.
    pub fn server_public_key(&self) -> PublicKey {
        self.server_key.public_key()
    }

    /// Start a challenge for `user`, replacing any active one.
    pub fn issue_challenge(&self, user: &PublicKey) -> AuthResult<IssuedChallenge> {
        let identity = user.to_hex();
        let _guard = self.lock(&identity);

        if self.discard(&identity)? {
            tracing::debug!(identity = ?user, "previous challenge discarded");
        }

        let ephemeral = KeyPair::generate();
        let ephemeral_public_key = ephemeral.public_key();
        let secret = ephemeral.diffie_hellman(user);

        let payload = Zeroizing::new(random_hex(CHALLENGE_PAYLOAD_LENGTH));
        let ciphertext = encrypt(&secret.aead_key(), payload.as_bytes())?;
        let server_signature = self.server_key.sign(&ephemeral_public_key.to_bytes())?;

        let now = self.clock.now();
        let record = ChallengeRecord {
            id: Uuid::new_v4(),
            user_public_key: user.clone(),
            ephemeral_public_key: ephemeral_public_key.clone(),
            ephemeral_secret: EphemeralSecret::new(&ephemeral.secret_bytes()[..]),
            server_signature,
            hashed_shared_key: secret.hashed_hex(),
            ciphered_payload: hex::encode(&ciphertext),
            created_at: now,
            expires_at: clock::expiry(now, self.challenge_ttl),
            state: ChallengeState::Issued,
            verified_at: None,
        };

        self.store
            .put_record(&keys::challenge(&identity), &record, Some(self.challenge_ttl))?;
        let ephemeral_set = keys::ephemeral_keys(&identity);
        self.store
            .set_add(&ephemeral_set, &ephemeral_public_key.to_hex())?;
        self.store.expire(&ephemeral_set, self.challenge_ttl)?;
        self.store.set_add(keys::ACTIVE_CHALLENGES, &identity)?;

        let log = keys::challenge_list(&identity);
        self.store.append_record(&log, &record.summary())?;
        self.store.expire(&log, self.session_ttl)?;

        tracing::info!(identity = ?user, challenge = %record.id, "challenge issued");

        Ok(IssuedChallenge {
            ciphered_payload: record.ciphered_payload.clone(),
            hashed_shared_key: record.hashed_shared_key.clone(),
            ephemeral_public_key,
            server_signature: record.server_signature,
        })
    }

    /// Check an answer and, on success, mint an identity record.
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no active challenge for `user` bound to
    ///   `ephemeral_public_key`.
    /// - `Crypto(ChallengeFailed)` if the payload does not match.
    /// - `Crypto(InvalidSignature)` if the signature does not verify.
    ///
    /// Both crypto failures discard the challenge.
    pub fn verify_response(
        &self,
        user: &PublicKey,
        decrypted_payload: &str,
        signature: &Signature,
        ephemeral_public_key: &PublicKey,
    ) -> AuthResult<IdentityRecord> {
        let identity = user.to_hex();
        let _guard = self.lock(&identity);

        let now = self.clock.now();
        let mut record = self
            .store
            .get_record::<ChallengeRecord>(&keys::challenge(&identity))?
            .filter(|r| r.is_active(now))
            .ok_or_else(AuthError::challenge_not_found)?;
        if &record.ephemeral_public_key != ephemeral_public_key
            || !self
                .store
                .set_is_member(&keys::ephemeral_keys(&identity), &ephemeral_public_key.to_hex())?
        {
            return Err(AuthError::challenge_not_found());
        }

        let ephemeral = KeyPair::from_bytes(record.ephemeral_secret.as_bytes())?;
        let secret = ephemeral.diffie_hellman(user);
        let ciphertext = hex::decode(&record.ciphered_payload)
            .map_err(|_| AuthError::Internal("stored challenge payload is not hex".into()))?;

        let matches = match decrypt(&secret.aead_key(), &ciphertext) {
            Ok(plaintext) => bool::from(
                Zeroizing::new(plaintext)
                    .as_slice()
                    .ct_eq(decrypted_payload.as_bytes()),
            ),
            Err(_) => false,
        };
        if !matches {
            self.discard(&identity)?;
            tracing::warn!(identity = ?user, challenge = %record.id, "challenge answer mismatch");
            return Err(CryptoError::ChallengeFailed.into());
        }

        if !user.verify(decrypted_payload.as_bytes(), signature) {
            self.discard(&identity)?;
            tracing::warn!(identity = ?user, challenge = %record.id, "challenge signature rejected");
            return Err(CryptoError::InvalidSignature.into());
        }

        let identity_record = IdentityRecord {
            public_key: user.clone(),
            verified_at: now,
            session_token: random_hex(SESSION_TOKEN_LENGTH),
            expires_at: clock::expiry(now, self.session_ttl),
        };
        self.store.put_record(
            &keys::session(&identity_record.session_token),
            &identity_record,
            Some(self.session_ttl),
        )?;
        self.store
            .put_record(&keys::identity(&identity), &identity_record, Some(self.session_ttl))?;
        self.store.set_add(keys::VERIFIED_IDENTITIES, &identity)?;

        record.state = ChallengeState::Verified;
        record.verified_at = Some(now);
        record.ephemeral_secret = EphemeralSecret::default();
        let remaining = (record.expires_at - now).to_std().unwrap_or(Duration::ZERO);
        self.store
            .put_record(&keys::challenge(&identity), &record, Some(remaining))?;
        self.store.delete(&keys::ephemeral_keys(&identity))?;
        self.store.set_remove(keys::ACTIVE_CHALLENGES, &identity)?;

        tracing::info!(identity = ?user, challenge = %record.id, "challenge verified");
        Ok(identity_record)
    }

    /// The active challenge for `user`, if any.
    pub fn active_challenge(&self, user: &PublicKey) -> AuthResult<Option<ChallengeRecord>> {
        let now = self.clock.now();
        Ok(self
            .store
            .get_record::<ChallengeRecord>(&keys::challenge(&user.to_hex()))?
            .filter(|r| r.is_active(now)))
    }

    /// Number of identities with an unexpired, unanswered challenge.
    pub fn active_count(&self) -> AuthResult<usize> {
        let now = self.clock.now();
        let mut count = 0;
        for identity in self.store.set_members(keys::ACTIVE_CHALLENGES)? {
            let active = self
                .store
                .get_record::<ChallengeRecord>(&keys::challenge(&identity))?
                .map_or(false, |r| r.is_active(now));
            if active {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn is_verified(&self, user: &PublicKey) -> AuthResult<bool> {
        Ok(self
            .store
            .set_is_member(keys::VERIFIED_IDENTITIES, &user.to_hex())?)
    }

    /// The identity record for the most recent successful verification.
    pub fn identity(&self, user: &PublicKey) -> AuthResult<Option<IdentityRecord>> {
        Ok(self.store.get_record(&keys::identity(&user.to_hex()))?)
    }

    /// Look up a session token.
    pub fn resolve_session(&self, token: &str) -> AuthResult<IdentityRecord> {
        if token.is_empty() {
            return Err(AuthError::Validation("session token must not be empty".into()));
        }
        self.store
            .get_record(&keys::session(token))?
            .ok_or_else(|| AuthError::NotFound("session not found or expired".into()))
    }

    /// Clear stale entries from the active set, then let the store drop
    /// every expired key. Returns how many keys the store removed.
    pub fn prune_expired(&self) -> AuthResult<usize> {
        let now = self.clock.now();
        for identity in self.store.set_members(keys::ACTIVE_CHALLENGES)? {
            let _guard = self.lock(&identity);
            let active = self
                .store
                .get_record::<ChallengeRecord>(&keys::challenge(&identity))?
                .map_or(false, |r| r.is_active(now));
            if !active {
                self.store.set_remove(keys::ACTIVE_CHALLENGES, &identity)?;
                self.store.delete(&keys::ephemeral_keys(&identity))?;
            }
        }
        let removed = self.store.prune_expired()?;
        if removed > 0 {
            tracing::debug!(removed, "expired keys pruned");
        }
        Ok(removed)
    }

    /// Drop the current challenge for `identity`. Returns whether one was
    /// active. Caller holds the identity's stripe.
    fn discard(&self, identity: &str) -> AuthResult<bool> {
        let now = self.clock.now();
        let key = keys::challenge(identity);
        let active = self
            .store
            .get_record::<ChallengeRecord>(&key)?
            .map_or(false, |r| r.is_active(now));
        if active {
            self.store.delete(&key)?;
        }
        self.store.delete(&keys::ephemeral_keys(identity))?;
        self.store.set_remove(keys::ACTIVE_CHALLENGES, identity)?;
        Ok(active)
    }

    fn lock(&self, identity: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        let stripe = (hasher.finish() % self.stripes.len() as u64) as usize;
        self.stripes[stripe].lock()
    }
}
