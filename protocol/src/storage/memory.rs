//! In-process [`KeyedStore`].
//!
//! A `HashMap` behind a `parking_lot::RwLock`. Reads take the read lock,
//! writes and pruning take the write lock. Expiry is checked lazily on read;
//! an expired entry stays in the map until it is overwritten or
//! [`prune_expired`](KeyedStore::prune_expired) runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{resolve_range, KeyedStore, StoreError, StoreResult};
use crate::clock::{self, Clock};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
    List(Vec<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Keyed store living entirely in process memory.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(clock::system())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a live entry for mutation, clearing it first if it has expired.
    /// The caller supplies the value to create when absent.
    fn live_entry_mut<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
        empty: impl FnOnce() -> Value,
    ) -> &'a mut Entry {
        let stale = map.get(key).map_or(false, |e| !e.is_live(now));
        if stale {
            map.remove(key);
        }
        map.entry(key.to_string()).or_insert_with(|| Entry {
            value: empty(),
            expires_at: None,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.entries.read().len())
            .finish()
    }
}

impl KeyedStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        match self.entries.read().get(key) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some(bytes.clone())),
                _ => Err(StoreError::WrongType(key.to_string())),
            },
            _ => Ok(None),
        }
    }

    fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let now = self.clock.now();
        let entry = Entry {
            value: Value::Bytes(value.to_vec()),
            expires_at: ttl.map(|ttl| clock::expiry(now, ttl)),
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        Ok(self
            .entries
            .write()
            .remove(key)
            .map_or(false, |entry| entry.is_live(now)))
    }

    fn set_add(&self, set: &str, member: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut map = self.entries.write();
        let entry = Self::live_entry_mut(&mut map, set, now, || Value::Set(BTreeSet::new()));
        match &mut entry.value {
            Value::Set(members) => Ok(members.insert(member.to_string())),
            _ => Err(StoreError::WrongType(set.to_string())),
        }
    }

    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.entries.write().get_mut(set) {
            Some(entry) if entry.is_live(now) => match &mut entry.value {
                Value::Set(members) => Ok(members.remove(member)),
                _ => Err(StoreError::WrongType(set.to_string())),
            },
            _ => Ok(false),
        }
    }

    fn set_is_member(&self, set: &str, member: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.entries.read().get(set) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(members) => Ok(members.contains(member)),
                _ => Err(StoreError::WrongType(set.to_string())),
            },
            _ => Ok(false),
        }
    }

    fn set_members(&self, set: &str) -> StoreResult<Vec<String>> {
        let now = self.clock.now();
        match self.entries.read().get(set) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::Set(members) => Ok(members.iter().cloned().collect()),
                _ => Err(StoreError::WrongType(set.to_string())),
            },
            _ => Ok(Vec::new()),
        }
    }

    fn list_append(&self, list: &str, value: &[u8]) -> StoreResult<u64> {
        let now = self.clock.now();
        let mut map = self.entries.write();
        let entry = Self::live_entry_mut(&mut map, list, now, || Value::List(Vec::new()));
        match &mut entry.value {
            Value::List(items) => {
                items.push(value.to_vec());
                Ok(items.len() as u64)
            }
            _ => Err(StoreError::WrongType(list.to_string())),
        }
    }

    fn list_range(&self, list: &str, start: i64, end: i64) -> StoreResult<Vec<Vec<u8>>> {
        let now = self.clock.now();
        match self.entries.read().get(list) {
            Some(entry) if entry.is_live(now) => match &entry.value {
                Value::List(items) => Ok(match resolve_range(items.len(), start, end) {
                    Some((lo, hi)) => items[lo..=hi].to_vec(),
                    None => Vec::new(),
                }),
                _ => Err(StoreError::WrongType(list.to_string())),
            },
            _ => Ok(Vec::new()),
        }
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let now = self.clock.now();
        match self.entries.write().get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(clock::expiry(now, ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn prune_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, entry| entry.is_live(now));
        Ok(before - map.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::contract_tests;

    #[test]
    fn plain_values() {
        contract_tests::plain_values(&MemoryStore::new());
    }

    #[test]
    fn sets() {
        contract_tests::sets(&MemoryStore::new());
    }

    #[test]
    fn lists() {
        contract_tests::lists(&MemoryStore::new());
    }

    #[test]
    fn ttl() {
        let clock = ManualClock::starting_now();
        let store = MemoryStore::with_clock(clock.clone());
        contract_tests::ttl(&store, &clock);
    }

    #[test]
    fn records() {
        contract_tests::records(&MemoryStore::new());
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", b"v", None).unwrap();
        assert!(matches!(store.set_add("k", "m"), Err(StoreError::WrongType(_))));
        assert!(matches!(store.list_append("k", b"x"), Err(StoreError::WrongType(_))));
    }

    #[test]
    fn expired_set_starts_fresh() {
        let clock = ManualClock::starting_now();
        let store = MemoryStore::with_clock(clock.clone());
        store.set_add("s", "old").unwrap();
        store.expire("s", Duration::from_secs(1)).unwrap();
        clock.advance(Duration::from_secs(2));
        assert!(store.set_add("s", "new").unwrap());
        assert_eq!(store.set_members("s").unwrap(), vec!["new"]);
    }

    #[test]
    fn len_ignores_expired() {
        let clock = ManualClock::starting_now();
        let store = MemoryStore::with_clock(clock.clone());
        store.set_with_ttl("a", b"1", None).unwrap();
        store
            .set_with_ttl("b", b"2", Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(store.len(), 2);
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        store.list_append("l", &[t, i as u8]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.list_range("l", 0, -1).unwrap().len(), 800);
    }
}
