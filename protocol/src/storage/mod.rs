//! # Storage Module
//!
//! The keyed-store contract the core is written against, plus two adapters.
//!
//! ```text
//! mod.rs    : KeyedStore trait, StoreError, typed helpers, key layout
//! memory.rs : MemoryStore: RwLock'd HashMap with lazy expiry
//! db.rs     : SledStore: sled trees with bincode values
//! ```
//!
//! The contract is Redis-shaped: strings with TTL, sets and lists. The
//! core never assumes anything beyond single-key atomicity; multi-key
//! invariants are protected by locks in the component that owns them.
//!
//! Records are stored as bincode. JSON is for the HTTP surface; bincode is
//! for storage.

pub mod db;
pub mod memory;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use db::SledStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors surfaced by a keyed store. None of them are retried by the core.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing engine failed (I/O, corruption, closed handle).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A key holds a different kind of value than the operation expects.
    #[error("wrong value type at key {0}")]
    WrongType(String),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// KeyedStore
// ---------------------------------------------------------------------------

/// The access contract every storage backend implements.
///
/// Object safe, so the core holds `Arc<dyn KeyedStore>` and never knows
/// which engine it is talking to. Expired keys behave exactly like missing
/// keys on every read.
pub trait KeyedStore: Send + Sync {
    /// Read a plain value.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a plain value, replacing whatever was there. `None` means no
    /// expiry.
    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a key of any type. Returns whether a live key existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Add `member` to a set. Returns `true` if it was not already present.
    fn set_add(&self, set: &str, member: &str) -> StoreResult<bool>;

    /// Remove `member` from a set. Returns `true` if it was present.
    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool>;

    fn set_is_member(&self, set: &str, member: &str) -> StoreResult<bool>;

    /// All members of a set, in lexicographic order.
    fn set_members(&self, set: &str) -> StoreResult<Vec<String>>;

    /// Append to a list. Returns the list length after the append.
    fn list_append(&self, list: &str, value: &[u8]) -> StoreResult<u64>;

    /// Inclusive range, Redis `LRANGE` style: negative indices count from
    /// the end, out-of-range bounds are clamped.
    fn list_range(&self, list: &str, start: i64, end: i64) -> StoreResult<Vec<Vec<u8>>>;

    /// Put a TTL on an existing key of any type. Returns `false` if the key
    /// does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Physically drop expired keys. Returns how many were removed.
    fn prune_expired(&self) -> StoreResult<usize>;
}

/// Typed helpers over [`KeyedStore`], bincode in and out.
pub trait StoreExt: KeyedStore {
    fn get_record<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> StoreResult<()> {
        let bytes = bincode::serialize(value)?;
        self.set_with_ttl(key, &bytes, ttl)
    }

    fn append_record<T: Serialize>(&self, list: &str, value: &T) -> StoreResult<u64> {
        let bytes = bincode::serialize(value)?;
        self.list_append(list, &bytes)
    }

    fn list_records<T: DeserializeOwned>(&self, list: &str) -> StoreResult<Vec<T>> {
        self.list_range(list, 0, -1)?
            .iter()
            .map(|bytes| bincode::deserialize(bytes).map_err(StoreError::from))
            .collect()
    }
}

impl<S: KeyedStore + ?Sized> StoreExt for S {}

/// Resolve an `LRANGE`-style inclusive range against a list of `len`
/// elements. `None` means the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if start > end || start >= len || end < 0 {
        return None;
    }
    Some((start as usize, end as usize))
}

// ---------------------------------------------------------------------------
// Key layout
// ---------------------------------------------------------------------------

/// Every persisted key, in one place.
pub mod keys {
    /// Set of every registered credential.
    pub const CREDENTIAL_SET: &str = "credentials:set";

    /// Registered credentials in insertion order. Index = leaf index.
    pub const CREDENTIAL_LIST: &str = "credentials:list";

    /// Root of the tree after the most recent insertion.
    pub const CREDENTIAL_ROOT: &str = "credentials:root";

    /// Identities that have completed a challenge.
    pub const VERIFIED_IDENTITIES: &str = "identities:verified";

    /// Identities with a challenge record on file.
    pub const ACTIVE_CHALLENGES: &str = "challenges:active";

    /// Merkle node history for one credential.
    pub fn credential_nodes(credential: &str) -> String {
        format!("credential:{credential}:nodes")
    }

    /// Root history for one credential.
    pub fn credential_roots(credential: &str) -> String {
        format!("credential:{credential}:roots")
    }

    /// Leaf count of the tree that produced `root` (hex).
    pub fn registry_root(root: &str) -> String {
        format!("root:{root}")
    }

    /// Credential to wallet address mapping.
    pub fn credential_wallet(credential: &str) -> String {
        format!("credential:{credential}:wallet")
    }

    pub fn wallet(address: &str) -> String {
        format!("wallet:{address}")
    }

    /// The current challenge record for an identity.
    pub fn challenge(identity: &str) -> String {
        format!("challenge:{identity}")
    }

    /// Every challenge ever issued to an identity (audit trail).
    pub fn challenge_list(identity: &str) -> String {
        format!("challenges:{identity}")
    }

    /// Ephemeral public keys currently bound to an identity.
    pub fn ephemeral_keys(identity: &str) -> String {
        format!("ephemeral:{identity}")
    }

    pub fn identity(identity: &str) -> String {
        format!("identity:{identity}")
    }

    pub fn session(token: &str) -> String {
        format!("session:{token}")
    }
}


/// Behaviour every backend must share. Each adapter's test module calls
/// these against its own instance.
#[cfg(test)]
pub(crate) mod contract_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    pub fn plain_values(store: &dyn KeyedStore) {
        assert_eq!(store.get("k").unwrap(), None);
        store.set_with_ttl("k", b"v1", None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v1".to_vec()));
        store.set_with_ttl("k", b"v2", None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    pub fn sets(store: &dyn KeyedStore) {
        assert!(store.set_add("s", "b").unwrap());
        assert!(store.set_add("s", "a").unwrap());
        assert!(!store.set_add("s", "a").unwrap());
        assert!(store.set_is_member("s", "a").unwrap());
        assert!(!store.set_is_member("s", "c").unwrap());
        assert_eq!(store.set_members("s").unwrap(), vec!["a", "b"]);
        assert!(store.set_remove("s", "b").unwrap());
        assert!(!store.set_remove("s", "b").unwrap());
        assert_eq!(store.set_members("s").unwrap(), vec!["a"]);
        assert!(store.delete("s").unwrap());
        assert!(!store.set_is_member("s", "a").unwrap());
    }

    pub fn lists(store: &dyn KeyedStore) {
        assert_eq!(store.list_append("l", b"0").unwrap(), 1);
        assert_eq!(store.list_append("l", b"1").unwrap(), 2);
        assert_eq!(store.list_append("l", b"2").unwrap(), 3);
        assert_eq!(
            store.list_range("l", 0, -1).unwrap(),
            vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]
        );
        assert_eq!(store.list_range("l", -1, -1).unwrap(), vec![b"2".to_vec()]);
        assert!(store.list_range("missing", 0, -1).unwrap().is_empty());
    }

    pub fn ttl(store: &dyn KeyedStore, clock: &Arc<ManualClock>) {
        store
            .set_with_ttl("short", b"v", Some(Duration::from_secs(10)))
            .unwrap();
        store.set_add("members", "x").unwrap();
        assert!(store.expire("members", Duration::from_secs(10)).unwrap());
        assert!(!store.expire("nothing", Duration::from_secs(10)).unwrap());

        clock.advance(Duration::from_secs(9));
        assert!(store.get("short").unwrap().is_some());
        assert!(store.set_is_member("members", "x").unwrap());

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.prune_expired().unwrap(), 2);
        assert_eq!(store.prune_expired().unwrap(), 0);
        assert_eq!(store.get("short").unwrap(), None);
        assert!(!store.set_is_member("members", "x").unwrap());

        // Lazy expiry without a sweep.
        store
            .set_with_ttl("lazy", b"v", Some(Duration::from_secs(1)))
            .unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("lazy").unwrap(), None);
    }

    pub fn records(store: &dyn KeyedStore) {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Rec {
            id: u32,
            name: String,
        }
        let rec = Rec {
            id: 7,
            name: "seven".into(),
        };
        store.put_record("rec", &rec, None).unwrap();
        assert_eq!(store.get_record::<Rec>("rec").unwrap(), Some(rec));
        store.append_record("recs", &1u64).unwrap();
        store.append_record("recs", &2u64).unwrap();
        assert_eq!(store.list_records::<u64>("recs").unwrap(), vec![1, 2]);
    }
}
