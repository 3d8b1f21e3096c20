//! Error types for KEYLESS.
//!
//! Every fallible core operation returns [`AuthError`]. The variants are the
//! six classes a transport needs to pick a response, plus `Internal` for
//! proving-system failures that are nobody's input fault. Module-level
//! errors ([`KeyError`], [`EncryptionError`], [`StoreError`], [`ZkError`])
//! fold into it through `From`.
//!
//! Nothing here is retried by the core. Retry policy belongs to whoever is
//! calling.

use thiserror::Error;

use crate::crypto::{EncryptionError, KeyError};
use crate::storage::StoreError;
use crate::zkp::ZkError;

/// Cryptographic failures. Messages never include key or plaintext material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Malformed key or signature encoding, or a failed signing operation.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// AEAD tag mismatch or truncated ciphertext.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    /// The decrypted challenge did not match the claimed plaintext.
    #[error("challenge response did not match")]
    ChallengeFailed,

    /// The response signature did not verify under the claimed key.
    #[error("signature verification failed")]
    InvalidSignature,
}

/// The error taxonomy every core operation reports in.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed or empty input, rejected before touching the store.
    #[error("validation error: {0}")]
    Validation(String),

    /// No active challenge, wallet, credential or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate credential or conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad key encoding, AEAD failure, signature mismatch.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A witness that does not hash to the claimed root.
    #[error("constraint error: {0}")]
    Constraint(String),

    /// The keyed store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Proving-system or serialization failure with no user-facing cause.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn challenge_not_found() -> Self {
        AuthError::NotFound("no active challenge for this identity".into())
    }

    pub fn duplicate_credential() -> Self {
        AuthError::Conflict("credential already registered".into())
    }

    /// HTTP-style status class for this error.
    ///
    /// Validation and conflict are the client's to fix (400). Crypto and
    /// constraint failures are "unauthorized" and "unverifiable" (401, 422)
    /// and come with no detail. Store and internal failures are 500.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::Validation(_) | AuthError::Conflict(_) => 400,
            AuthError::NotFound(_) => 404,
            AuthError::Crypto(_) => 401,
            AuthError::Constraint(_) => 422,
            AuthError::Store(_) | AuthError::Internal(_) => 500,
        }
    }

    /// The message that may be shown to a remote caller.
    ///
    /// Crypto and constraint failures collapse to one generic string each so
    /// a caller cannot tell which check tripped. Store and internal errors
    /// hide their cause too; it goes to the log instead.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Validation(_) | AuthError::NotFound(_) | AuthError::Conflict(_) => {
                self.to_string()
            }
            AuthError::Crypto(_) => "unauthorized".into(),
            AuthError::Constraint(_) => "proof witness could not be verified".into(),
            AuthError::Store(_) | AuthError::Internal(_) => "internal error".into(),
        }
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        AuthError::Crypto(CryptoError::Key(err))
    }
}

impl From<EncryptionError> for AuthError {
    fn from(err: EncryptionError) -> Self {
        AuthError::Crypto(CryptoError::Encryption(err))
    }
}

impl From<ZkError> for AuthError {
    fn from(err: ZkError) -> Self {
        match err {
            ZkError::Witness(msg) => AuthError::Validation(msg),
            ZkError::ConstraintUnsatisfied => AuthError::Constraint(err.to_string()),
            ZkError::DepthExceeded { .. } => AuthError::Validation(err.to_string()),
            ZkError::Setup(_) | ZkError::Proving(_) | ZkError::Serialization(_) => {
                AuthError::Internal(err.to_string())
            }
        }
    }
}
