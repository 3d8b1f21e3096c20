//! Persisted session-layer records and the wire shapes of the challenge
//! exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{PublicKey, Signature};

/// Where a stored challenge record is in its life.
///
/// `Expired` is not stored; it is what an `Issued` record past its
/// `expires_at` reads as. Discarded records are deleted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeState {
    Issued,
    Verified,
}

/// Raw ephemeral scalar bytes. Wiped on drop and when a challenge resolves.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralSecret(Vec<u8>);

impl EphemeralSecret {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_wiped(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl std::fmt::Debug for EphemeralSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralSecret(..)")
    }
}

/// The server's side of one challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub id: Uuid,
    pub user_public_key: PublicKey,
    pub ephemeral_public_key: PublicKey,
    pub ephemeral_secret: EphemeralSecret,
    /// Server long-term signature over the encoded ephemeral public key.
    pub server_signature: Signature,
    pub hashed_shared_key: String,
    /// Hex of `nonce || ciphertext || tag`.
    pub ciphered_payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: ChallengeState,
    pub verified_at: Option<DateTime<Utc>>,
}

impl ChallengeRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Issued and not yet expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state == ChallengeState::Issued && !self.is_expired(now)
    }

    pub(crate) fn summary(&self) -> ChallengeLogEntry {
        ChallengeLogEntry {
            id: self.id,
            ephemeral_public_key: self.ephemeral_public_key.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Audit entry appended to an identity's challenge list. Carries no secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeLogEntry {
    pub id: Uuid,
    pub ephemeral_public_key: PublicKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What the server sends back for a challenge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedChallenge {
    pub ciphered_payload: String,
    pub hashed_shared_key: String,
    pub ephemeral_public_key: PublicKey,
    pub server_signature: Signature,
}

/// The client's answer to an [`IssuedChallenge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeAnswer {
    pub claimant_public_key: PublicKey,
    pub decrypted_payload: String,
    pub signature: Signature,
    pub ephemeral_public_key: PublicKey,
}

/// Minted when a challenge is answered correctly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub public_key: PublicKey,
    pub verified_at: DateTime<Utc>,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn record(now: DateTime<Utc>) -> ChallengeRecord {
        let user = KeyPair::generate();
        let eph = KeyPair::generate();
        ChallengeRecord {
            id: Uuid::new_v4(),
            user_public_key: user.public_key(),
            ephemeral_public_key: eph.public_key(),
            ephemeral_secret: EphemeralSecret::new(&eph.secret_bytes()[..]),
            server_signature: eph.sign(b"x").unwrap(),
            hashed_shared_key: String::new(),
            ciphered_payload: String::new(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(60),
            state: ChallengeState::Issued,
            verified_at: None,
        }
    }

    #[test]
    fn active_until_expiry() {
        let now = Utc::now();
        let rec = record(now);
        assert!(rec.is_active(now));
        assert!(rec.is_active(now + chrono::Duration::seconds(59)));
        assert!(!rec.is_active(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn resolved_records_are_inactive() {
        let now = Utc::now();
        let mut rec = record(now);
        rec.state = ChallengeState::Verified;
        assert!(!rec.is_active(now));
    }

    #[test]
    fn secret_survives_bincode_and_wipes() {
        let rec = record(Utc::now());
        let bytes = bincode::serialize(&rec).unwrap();
        let mut back: ChallengeRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.ephemeral_secret, rec.ephemeral_secret);
        assert_eq!(back.ephemeral_public_key, rec.ephemeral_public_key);

        back.ephemeral_secret.zeroize();
        assert!(back.ephemeral_secret.is_wiped());
    }

    #[test]
    fn debug_hides_secret() {
        let rec = record(Utc::now());
        assert_eq!(format!("{:?}", rec.ephemeral_secret), "EphemeralSecret(..)");
    }
}
