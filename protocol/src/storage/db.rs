//! # SledStore: Persistent Keyed Store
//!
//! [`KeyedStore`] on top of sled's embedded key-value engine, for
//! deployments that want challenges and the credential registry to survive
//! a restart without running a separate database.
//!
//! ## Tree Layout
//!
//! | Tree      | Key                             | Value                |
//! |-----------|---------------------------------|----------------------|
//! | `values`  | key (UTF-8)                     | raw bytes            |
//! | `sets`    | `set \0 member`                 | empty                |
//! | `lists`   | `list \0 index` (8B BE)         | raw bytes            |
//! | `expiry`  | key (UTF-8)                     | unix millis (8B BE)  |
//!
//! List indices are big-endian u64 so sled's lexicographic ordering matches
//! insertion order, and a prefix scan returns the list in order.
//!
//! ## Expiry
//!
//! Expiry is lazy, as in the in-memory store, except that a read which finds
//! an expired key also purges it. `prune_expired` walks the `expiry` tree.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sled::{Batch, Db, Tree};

use super::{resolve_range, KeyedStore, StoreError, StoreResult};
use crate::clock::{self, Clock};

const SEPARATOR: u8 = 0;

/// Persistent keyed store backed by sled.
///
/// sled trees are safe for concurrent use. The one read-modify-write in the
/// contract, `list_append`, is serialized by `append_lock`.
pub struct SledStore {
    db: Db,
    values: Tree,
    sets: Tree,
    lists: Tree,
    expiry: Tree,
    append_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl SledStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db, clock::system())
    }

    /// A store that lives in a temp directory and vanishes on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        Self::open_temporary_with_clock(clock::system())
    }

    pub fn open_temporary_with_clock(clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, clock)
    }

    fn from_db(db: Db, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        Ok(Self {
            values: db.open_tree("values")?,
            sets: db.open_tree("sets")?,
            lists: db.open_tree("lists")?,
            expiry: db.open_tree("expiry")?,
            db,
            append_lock: Mutex::new(()),
            clock,
        })
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn prefix(name: &str) -> Vec<u8> {
        let mut key = name.as_bytes().to_vec();
        key.push(SEPARATOR);
        key
    }

    fn set_key(set: &str, member: &str) -> Vec<u8> {
        let mut key = Self::prefix(set);
        key.extend_from_slice(member.as_bytes());
        key
    }

    fn list_key(list: &str, index: u64) -> Vec<u8> {
        let mut key = Self::prefix(list);
        key.extend_from_slice(&index.to_be_bytes());
        key
    }

    fn expires_at(&self, key: &str) -> StoreResult<Option<DateTime<Utc>>> {
        match self.expiry.get(key.as_bytes())? {
            Some(raw) => {
                let millis = i64::from_be_bytes(
                    raw.as_ref()
                        .try_into()
                        .map_err(|_| StoreError::Serialization("invalid expiry bytes".into()))?,
                );
                Ok(DateTime::<Utc>::from_timestamp_millis(millis))
            }
            None => Ok(None),
        }
    }

    fn set_expiry(&self, key: &str, ttl: Option<Duration>) -> StoreResult<()> {
        match ttl {
            Some(ttl) => {
                let at = clock::expiry(self.clock.now(), ttl).timestamp_millis();
                self.expiry.insert(key.as_bytes(), at.to_be_bytes().to_vec())?;
            }
            None => {
                self.expiry.remove(key.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Returns `true` if `key` was expired and has just been purged.
    fn purge_if_expired(&self, key: &str) -> StoreResult<bool> {
        match self.expires_at(key)? {
            Some(at) if self.clock.now() >= at => {
                self.remove_all(key)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop every trace of `key`. Returns whether anything was stored.
    fn remove_all(&self, key: &str) -> StoreResult<bool> {
        let mut existed = self.values.remove(key.as_bytes())?.is_some();
        for tree in [&self.sets, &self.lists] {
            let mut batch = Batch::default();
            for item in tree.scan_prefix(Self::prefix(key)) {
                let (k, _) = item?;
                batch.remove(k);
                existed = true;
            }
            tree.apply_batch(batch)?;
        }
        self.expiry.remove(key.as_bytes())?;
        Ok(existed)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.values.contains_key(key.as_bytes())?
            || self.sets.scan_prefix(Self::prefix(key)).next().is_some()
            || self.lists.scan_prefix(Self::prefix(key)).next().is_some())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("values", &self.values.len())
            .finish()
    }
}

impl KeyedStore for SledStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if self.purge_if_expired(key)? {
            return Ok(None);
        }
        Ok(self.values.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.values.insert(key.as_bytes(), value)?;
        self.set_expiry(key, ttl)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        if self.purge_if_expired(key)? {
            return Ok(false);
        }
        self.remove_all(key)
    }

    fn set_add(&self, set: &str, member: &str) -> StoreResult<bool> {
        self.purge_if_expired(set)?;
        let previous = self.sets.insert(Self::set_key(set, member), &b""[..])?;
        Ok(previous.is_none())
    }

    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        if self.purge_if_expired(set)? {
            return Ok(false);
        }
        Ok(self.sets.remove(Self::set_key(set, member))?.is_some())
    }

    fn set_is_member(&self, set: &str, member: &str) -> StoreResult<bool> {
        if self.purge_if_expired(set)? {
            return Ok(false);
        }
        Ok(self.sets.contains_key(Self::set_key(set, member))?)
    }

    fn set_members(&self, set: &str) -> StoreResult<Vec<String>> {
        if self.purge_if_expired(set)? {
            return Ok(Vec::new());
        }
        let prefix = Self::prefix(set);
        let mut members = Vec::new();
        for item in self.sets.scan_prefix(&prefix) {
            let (key, _) = item?;
            let member = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            members.push(member);
        }
        Ok(members)
    }

    fn list_append(&self, list: &str, value: &[u8]) -> StoreResult<u64> {
        let _guard = self.append_lock.lock();
        self.purge_if_expired(list)?;
        let prefix = Self::prefix(list);
        let next = match self.lists.scan_prefix(&prefix).next_back() {
            Some(item) => {
                let (key, _) = item?;
                let index: [u8; 8] = key[prefix.len()..]
                    .try_into()
                    .map_err(|_| StoreError::Serialization("invalid list index".into()))?;
                u64::from_be_bytes(index) + 1
            }
            None => 0,
        };
        self.lists.insert(Self::list_key(list, next), value)?;
        Ok(next + 1)
    }

    fn list_range(&self, list: &str, start: i64, end: i64) -> StoreResult<Vec<Vec<u8>>> {
        if self.purge_if_expired(list)? {
            return Ok(Vec::new());
        }
        let items = self
            .lists
            .scan_prefix(Self::prefix(list))
            .values()
            .map(|v| v.map(|v| v.to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match resolve_range(items.len(), start, end) {
            Some((lo, hi)) => items[lo..=hi].to_vec(),
            None => Vec::new(),
        })
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        if self.purge_if_expired(key)? || !self.exists(key)? {
            return Ok(false);
        }
        self.set_expiry(key, Some(ttl))?;
        Ok(true)
    }

    fn prune_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for item in self.expiry.iter() {
            let (key, raw) = item?;
            let millis = i64::from_be_bytes(
                raw.as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Serialization("invalid expiry bytes".into()))?,
            );
            if DateTime::<Utc>::from_timestamp_millis(millis).map_or(true, |at| now >= at) {
                expired.push(String::from_utf8_lossy(&key).into_owned());
            }
        }
        for key in &expired {
            self.remove_all(key)?;
        }
        Ok(expired.len())
    }
}
