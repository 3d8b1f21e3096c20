//! # Protocol Configuration & Constants
//!
//! Every magic number in KEYLESS lives here, next to the one runtime knob
//! struct ([`AuthConfig`]) the server is allowed to tune. If a constant is
//! hardcoded somewhere else, move it here.
//!
//! Some of these values are part of the wire contract with clients (key
//! encodings, the key-derivation context, the credential salt). Changing them
//! invalidates every client in the field, so treat them as frozen.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate version, surfaced by the health endpoint and the CLI.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bech32 human-readable prefix for wallet addresses.
pub const WALLET_HRP: &str = "keyless";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Challenge keys live on NIST P-256. Clients are browsers and phones, and
/// WebCrypto speaks P-256 out of the box.
pub const KEY_EXCHANGE_CURVE: &str = "P-256";

/// Length of a P-256 private scalar in bytes.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Uncompressed SEC1 point: `0x04 || x || y`.
pub const PUBLIC_KEY_LENGTH: usize = 65;

/// Tag byte that opens every uncompressed SEC1 point.
pub const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// ECDSA signature as fixed-width `r || s`.
pub const SIGNATURE_LENGTH: usize = 64;

/// ECDH output length (the affine x-coordinate).
pub const SHARED_SECRET_LENGTH: usize = 32;

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce length. 96 bits, the only size anyone should use.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-GCM authentication tag length.
pub const AES_TAG_LENGTH: usize = 16;

/// BLAKE3 derive-key context for turning an ECDH secret into an AEAD key.
pub const CHALLENGE_KEY_CONTEXT: &str = "keyless 2026-01 challenge aead key";

/// BLAKE3 derive-key context for the key that seals wallet private keys.
pub const WALLET_SEAL_CONTEXT: &str = "keyless 2026-01 wallet seal key";

/// Random bytes in a challenge payload before hex encoding.
pub const CHALLENGE_PAYLOAD_LENGTH: usize = 32;

/// Random bytes in a session token before hex encoding.
pub const SESSION_TOKEN_LENGTH: usize = 32;

/// Salt prepended to raw credentials by [`crate::crypto::hash::hash_credential`].
pub const CREDENTIAL_SALT: [u8; 4] = [0x1c, 0x9d, 0x3c, 0x4f];

/// Hex length of a hashed credential (SHA-256 digest).
pub const HASHED_CREDENTIAL_HEX_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Zero-Knowledge Parameters
// ---------------------------------------------------------------------------

/// Pairing curve for Groth16.
pub const ZKP_CURVE: &str = "BN254";

/// Poseidon sponge rate. Three lanes fit a domain tag plus two children,
/// so every Merkle hash is a single permutation.
pub const POSEIDON_RATE: usize = 3;

/// Poseidon sponge capacity.
pub const POSEIDON_CAPACITY: usize = 1;

/// Poseidon S-box exponent. `x^5` is a permutation over BN254 Fr.
pub const POSEIDON_ALPHA: u64 = 5;

/// Poseidon full rounds.
pub const POSEIDON_FULL_ROUNDS: usize = 8;

/// Poseidon partial rounds for width 4 at 128-bit security.
pub const POSEIDON_PARTIAL_ROUNDS: usize = 56;

/// Domain tag absorbed before a leaf value. Leaf commitments and internal
/// nodes never share a sponge input.
pub const MERKLE_LEAF_DOMAIN: u64 = 1;

/// Domain tag absorbed before a pair of children.
pub const MERKLE_NODE_DOMAIN: u64 = 2;

/// Default circuit depth: room for about a million credentials.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 20;

/// Hard upper bound on circuit depth. Setup cost grows linearly with depth
/// and nobody has 2^64 credentials.
pub const MAX_TREE_DEPTH_LIMIT: usize = 64;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Default lifetime of an issued challenge.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default lifetime of a session minted by a successful verification.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often the node sweeps expired challenges.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Number of stripes in the per-identity issuance lock table.
pub const IDENTITY_LOCK_STRIPES: usize = 64;

// ---------------------------------------------------------------------------
// Runtime configuration
// ---------------------------------------------------------------------------

/// Tunables for one [`crate::orchestrator::AuthOrchestrator`].
///
/// The node fills this in from CLI flags and `KEYLESS_*` environment
/// variables; tests usually start from `AuthConfig::default()` and shrink
/// `max_tree_depth` to keep Groth16 setup fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long an issued challenge stays answerable.
    pub challenge_ttl: Duration,
    /// How long a minted session token resolves.
    pub session_ttl: Duration,
    /// Fixed circuit depth shared by setup, proving and verifying.
    pub max_tree_depth: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
        }
    }
}

impl AuthConfig {
    /// Reject settings that would make the server unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.challenge_ttl.is_zero() {
            return Err("challenge TTL must be non-zero".into());
        }
        if self.session_ttl.is_zero() {
            return Err("session TTL must be non-zero".into());
        }
        if self.max_tree_depth == 0 || self.max_tree_depth > MAX_TREE_DEPTH_LIMIT {
            return Err(format!(
                "max tree depth must be in 1..={MAX_TREE_DEPTH_LIMIT}, got {}",
                self.max_tree_depth
            ));
        }
        Ok(())
    }
}
