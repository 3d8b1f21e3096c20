//! # Cryptographic Primitives for KEYLESS
//!
//! Every key, signature, shared secret and ciphertext in the protocol flows
//! through here.
//!
//! - **P-256** for ECDH and ECDSA (`keys`, `exchange`).
//! - **AES-256-GCM** for authenticated encryption (`encryption`).
//! - **SHA-256 / BLAKE3** for digests and key derivation (`hash`).
//!
//! Everything here is a thin, typed wrapper around audited RustCrypto
//! implementations. Nothing is hand-rolled.

pub mod encryption;
pub mod exchange;
pub mod hash;
pub mod keys;

pub use encryption::{decrypt, encrypt, EncryptionError};
pub use exchange::{derive_shared_secret, generate_nonce, hash_shared_secret, random_hex, SharedSecret};
pub use hash::{blake3_hash, hash_credential, hash_to_field, sha256};
pub use keys::{KeyError, KeyPair, PublicKey, Signature};
