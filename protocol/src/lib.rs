// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # KEYLESS Core Library
//!
//! Passwordless login without a password database to leak. A client proves
//! it holds a private key by answering an encrypted challenge, and proves
//! that one of its credentials is registered by handing over a Groth16
//! proof that says nothing about which one.
//!
//! P-256 carries the key exchange and signatures because every browser and
//! secure enclave already speaks it. BN254 with Poseidon carries the
//! membership proofs because arkworks makes that pairing cheap to prove
//! over. AES-256-GCM seals everything in between.
//!
//! ## Architecture
//!
//! - **crypto**: P-256 keys, ECDH, AES-GCM, hashing. Thin wrappers, nothing hand-rolled.
//! - **session**: The challenge state machine. One live challenge per identity.
//! - **registry**: Append-only Merkle accumulator over registered credentials.
//! - **zkp**: The membership circuit, its prover and its verifier.
//! - **wallet**: One Ed25519 wallet per registered credential.
//! - **orchestrator**: The user-facing flows, composed from the above.
//! - **storage**: The keyed-store contract, an in-memory adapter and a sled one.
//! - **clock**: Injectable time, so expiry can be tested without sleeping.
//! - **config**: Protocol constants and runtime tunables.
//! - **error**: The error taxonomy every flow reports in.
//!
//! ## Design Philosophy
//!
//! 1. The core only talks to a store contract. Swapping engines is a wiring change.
//! 2. Secrets live in zeroizing buffers and never reach a log line.
//! 3. Anything that can reject a caller has a test proving that it does.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod storage;
pub mod wallet;
pub mod zkp;

pub use error::{AuthError, AuthResult};
pub use orchestrator::{AuthOrchestrator, RegistrationReceipt};
