//! # Credential Registry
//!
//! Append-only Merkle accumulator over registered credentials.
//!
//! ```text
//! hasher.rs : domain-tagged Poseidon leaf and node hashes, padding element
//! merkle.rs : MerkleTree (full rebuild), compute_root, InclusionProof
//! mod.rs    : CredentialRegistry: persistence, locking, history
//! ```
//!
//! ## Persistence
//!
//! The registry is nothing but a set (for duplicate checks) and a list (for
//! order) in the keyed store. The tree is recomputed from the list on every
//! read. Each insertion also appends a [`MerkleNode`] and a [`RootRecord`] to
//! per-credential history lists. Those are audit records; a proof that is
//! valid *now* always comes from [`CredentialRegistry::generate_proof`].
//! Every root a registration produces is indexed with its leaf count, which
//! gives verifiers the tree depth for that root.
//!
//! The set and the list are two keys. If the list append fails after the
//! set accepted a credential, the set entry is removed again so the
//! credential can be retried.
//!
//! ## Concurrency
//!
//! Insertions take `write_lock`, so "check capacity, append, rebuild, prove"
//! happens against one tree state. Reads take a single list snapshot and
//! need no lock.
//!
//! The rebuild is O(n) Poseidon hashes per call. Fine for tens of thousands
//! of credentials; anything larger wants an incremental tree with the same
//! padding and sibling order.

pub mod hasher;
pub mod merkle;

use std::sync::Arc;

use ark_bn254::Fr;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::hash::field_to_hex;
use crate::error::{AuthError, AuthResult};
use crate::storage::{keys, KeyedStore, StoreExt};

pub use hasher::{hash_leaf, hash_pair, leaf_for, poseidon_config};
pub use merkle::{compute_root, depth_for, InclusionProof, MerkleTree};

/// Immutable record written once per insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub id: Uuid,
    /// The leaf field element, hex.
    pub credential_hash: String,
    /// The credential string as registered.
    pub owning_credential: String,
    pub leaf_index: u64,
    /// Siblings at insertion time. Not valid against later roots.
    pub sibling_hashes: Vec<String>,
    pub directions: Vec<u8>,
    pub previous_root: String,
    pub root_after: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in a credential's root history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub root: String,
    pub leaf_count: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Root and shape of the current tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSummary {
    pub root: Fr,
    pub depth: usize,
    pub leaf_count: u64,
}

/// Everything one atomic registration produced.
#[derive(Debug, Clone)]
pub struct Registration {
    pub leaf_index: u64,
    pub proof: InclusionProof,
    pub node: MerkleNode,
}

/// The credential accumulator.
pub struct CredentialRegistry {
    store: Arc<dyn KeyedStore>,
    clock: Arc<dyn Clock>,
    max_leaves: u64,
    write_lock: Mutex<()>,
}

impl CredentialRegistry {
    /// A registry that accepts at most `max_leaves` credentials.
    pub fn new(store: Arc<dyn KeyedStore>, clock: Arc<dyn Clock>, max_leaves: u64) -> Self {
        Self {
            store,
            clock,
            max_leaves,
            write_lock: Mutex::new(()),
        }
    }

    /// Capacity of a registry whose proofs fit a circuit of `max_depth`.
    pub fn capacity_for_depth(max_depth: usize) -> u64 {
        u32::try_from(max_depth)
            .ok()
            .and_then(|shift| 1u64.checked_shl(shift))
            .unwrap_or(u64::MAX)
    }

    pub fn max_leaves(&self) -> u64 {
        self.max_leaves
    }

    pub fn exists(&self, credential: &str) -> AuthResult<bool> {
        Ok(self.store.set_is_member(keys::CREDENTIAL_SET, credential)?)
    }

    /// Append `credential`. Returns its leaf index.
    pub fn add_credential(&self, credential: &str) -> AuthResult<u64> {
        let _guard = self.write_lock.lock();
        self.append(credential)
    }

    /// Rebuild the tree and report its root and depth.
    pub fn build_tree(&self) -> AuthResult<(Fr, usize)> {
        let tree = self.tree()?;
        Ok((tree.root(), tree.depth()))
    }

    /// A fresh inclusion proof for `leaf_index` against the current root.
    pub fn generate_proof(&self, leaf_index: u64) -> AuthResult<InclusionProof> {
        let tree = self.tree()?;
        Self::proof_from(&tree, leaf_index)
    }

    /// Current root and leaf count.
    pub fn get_root(&self) -> AuthResult<(Fr, u64)> {
        let summary = self.summary()?;
        Ok((summary.root, summary.leaf_count))
    }

    pub fn summary(&self) -> AuthResult<TreeSummary> {
        let tree = self.tree()?;
        Ok(TreeSummary {
            root: tree.root(),
            depth: tree.depth(),
            leaf_count: tree.leaf_count() as u64,
        })
    }

    /// Append, rebuild and prove as one unit, then write the history records.
    pub fn register(&self, credential: &str) -> AuthResult<Registration> {
        let _guard = self.write_lock.lock();

        let previous_root = self
            .store
            .get_record::<String>(keys::CREDENTIAL_ROOT)?
            .unwrap_or_else(|| field_to_hex(&hasher::padding()));

        let leaf_index = self.append(credential)?;
        let tree = self.tree()?;
        let proof = Self::proof_from(&tree, leaf_index)?;
        let now = self.clock.now();

        let node = MerkleNode {
            id: Uuid::new_v4(),
            credential_hash: proof.leaf.clone(),
            owning_credential: credential.to_string(),
            leaf_index,
            sibling_hashes: proof.siblings.clone(),
            directions: proof.directions.clone(),
            previous_root,
            root_after: proof.root.clone(),
            created_at: now,
        };
        self.store
            .append_record(&keys::credential_nodes(credential), &node)?;
        self.store.append_record(
            &keys::credential_roots(credential),
            &RootRecord {
                root: proof.root.clone(),
                leaf_count: tree.leaf_count() as u64,
                recorded_at: now,
            },
        )?;
        self.store.put_record(
            &keys::registry_root(&proof.root),
            &(tree.leaf_count() as u64),
            None,
        )?;
        self.store
            .put_record(keys::CREDENTIAL_ROOT, &proof.root, None)?;

        tracing::debug!(
            leaf_index,
            root = %proof.root,
            leaves = tree.leaf_count(),
            "credential registered"
        );

        Ok(Registration {
            leaf_index,
            proof,
            node,
        })
    }

    /// Insertion-time node records for `credential`, oldest first.
    pub fn node_history(&self, credential: &str) -> AuthResult<Vec<MerkleNode>> {
        Ok(self
            .store
            .list_records(&keys::credential_nodes(credential))?)
    }

    /// Roots recorded when `credential` was inserted.
    pub fn root_history(&self, credential: &str) -> AuthResult<Vec<RootRecord>> {
        Ok(self
            .store
            .list_records(&keys::credential_roots(credential))?)
    }

    /// Depth of the tree that produced `root`, or `None` if this registry
    /// never had that root.
    pub fn depth_of_root(&self, root: &Fr) -> AuthResult<Option<usize>> {
        if let Some(leaf_count) = self
            .store
            .get_record::<u64>(&keys::registry_root(&field_to_hex(root)))?
        {
            return Ok(Some(depth_for(leaf_count)));
        }
        let summary = self.summary()?;
        Ok((summary.leaf_count > 0 && summary.root == *root).then_some(summary.depth))
    }

    /// Leaf index of a registered credential.
    pub fn index_of(&self, credential: &str) -> AuthResult<u64> {
        self.credentials()?
            .iter()
            .position(|c| c == credential)
            .map(|i| i as u64)
            .ok_or_else(|| AuthError::NotFound("credential is not registered".into()))
    }

    /// Classical check: does `proof` take `credential`'s leaf to its root?
    pub fn verify_inclusion(&self, credential: &str, proof: &InclusionProof) -> bool {
        proof.verify_leaf(&leaf_for(credential))
    }

    /// All credentials, in leaf order.
    pub fn credentials(&self) -> AuthResult<Vec<String>> {
        self.store
            .list_range(keys::CREDENTIAL_LIST, 0, -1)?
            .into_iter()
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|_| AuthError::Internal("credential list holds non-UTF-8 entry".into()))
            })
            .collect()
    }

    fn tree(&self) -> AuthResult<MerkleTree> {
        let leaves = self
            .credentials()?
            .iter()
            .map(|c| leaf_for(c))
            .collect();
        Ok(MerkleTree::build(leaves))
    }

    /// Caller holds `write_lock`.
    fn append(&self, credential: &str) -> AuthResult<u64> {
        if credential.is_empty() {
            return Err(AuthError::Validation("credential must not be empty".into()));
        }
        let leaf_count = self.store.list_range(keys::CREDENTIAL_LIST, 0, -1)?.len() as u64;
        if leaf_count >= self.max_leaves {
            if self.exists(credential)? {
                return Err(AuthError::duplicate_credential());
            }
            return Err(AuthError::Validation(format!(
                "registry is full at {leaf_count} credentials"
            )));
        }
        if !self.store.set_add(keys::CREDENTIAL_SET, credential)? {
            return Err(AuthError::duplicate_credential());
        }
        match self
            .store
            .list_append(keys::CREDENTIAL_LIST, credential.as_bytes())
        {
            Ok(len) => Ok(len - 1),
            Err(err) => {
                if let Err(rollback) = self.store.set_remove(keys::CREDENTIAL_SET, credential) {
                    tracing::error!(
                        error = %rollback,
                        "credential left in the set without a leaf"
                    );
                }
                Err(err.into())
            }
        }
    }

    fn proof_from(tree: &MerkleTree, leaf_index: u64) -> AuthResult<InclusionProof> {
        usize::try_from(leaf_index)
            .ok()
            .and_then(|index| InclusionProof::from_tree(tree, index))
            .ok_or_else(|| {
                AuthError::NotFound(format!(
                    "leaf index {leaf_index} out of range (tree has {} leaves)",
                    tree.leaf_count()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use crate::storage::{MemoryStore, StoreError, StoreResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn registry() -> CredentialRegistry {
        CredentialRegistry::new(Arc::new(MemoryStore::new()), clock::system(), 1 << 10)
    }

    /// A memory store whose list appends can be switched to fail.
    #[derive(Default)]
    struct FlakyListStore {
        inner: MemoryStore,
        fail_appends: AtomicBool,
    }

    impl KeyedStore for FlakyListStore {
        fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set_with_ttl(key, value, ttl)
        }
        fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key)
        }
        fn set_add(&self, set: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_add(set, member)
        }
        fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_remove(set, member)
        }
        fn set_is_member(&self, set: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_is_member(set, member)
        }
        fn set_members(&self, set: &str) -> StoreResult<Vec<String>> {
            self.inner.set_members(set)
        }
        fn list_append(&self, list: &str, value: &[u8]) -> StoreResult<u64> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("list append refused".into()));
            }
            self.inner.list_append(list, value)
        }
        fn list_range(&self, list: &str, start: i64, end: i64) -> StoreResult<Vec<Vec<u8>>> {
            self.inner.list_range(list, start, end)
        }
        fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.inner.expire(key, ttl)
        }
        fn prune_expired(&self) -> StoreResult<usize> {
            self.inner.prune_expired()
        }
    }

    #[test]
    fn concrete_three_credentials() {
        let reg = registry();
        assert_eq!(reg.add_credential("a").unwrap(), 0);
        assert_eq!(reg.add_credential("b").unwrap(), 1);
        assert_eq!(reg.add_credential("c").unwrap(), 2);

        let proof = reg.generate_proof(1).unwrap();
        assert_eq!(proof.siblings.len(), 2);

        let (root, count) = reg.get_root().unwrap();
        assert_eq!(count, 3);
        assert_eq!(proof.root, field_to_hex(&root));

        assert!(reg.verify_inclusion("b", &proof));
        assert!(!reg.verify_inclusion("a", &proof));
    }

    #[test]
    fn duplicate_rejected_and_count_unchanged() {
        let reg = registry();
        reg.add_credential("c").unwrap();
        let err = reg.add_credential("c").unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
        assert_eq!(reg.get_root().unwrap().1, 1);
    }

    #[test]
    fn empty_credential_rejected() {
        let reg = registry();
        assert!(matches!(reg.add_credential(""), Err(AuthError::Validation(_))));
        assert!(!reg.exists("").unwrap());
    }

    #[test]
    fn exists_tracks_insertions() {
        let reg = registry();
        assert!(!reg.exists("x").unwrap());
        reg.add_credential("x").unwrap();
        assert!(reg.exists("x").unwrap());
    }

    #[test]
    fn proofs_fold_to_root_for_many_sizes() {
        for n in [1usize, 2, 3, 5, 16] {
            let reg = registry();
            for i in 0..n {
                reg.add_credential(&format!("cred-{i}")).unwrap();
            }
            let (root, count) = reg.get_root().unwrap();
            assert_eq!(count as usize, n);
            for i in 0..n {
                let proof = reg.generate_proof(i as u64).unwrap();
                assert_eq!(proof.root, field_to_hex(&root));
                assert!(reg.verify_inclusion(&format!("cred-{i}"), &proof), "n = {n}, i = {i}");
            }
        }
    }

    #[test]
    fn build_tree_reports_depth() {
        let reg = registry();
        assert_eq!(reg.build_tree().unwrap().1, 0);
        for c in ["a", "b", "c", "d", "e"] {
            reg.add_credential(c).unwrap();
        }
        assert_eq!(reg.build_tree().unwrap().1, 3);
    }

    #[test]
    fn proof_out_of_range_is_not_found() {
        let reg = registry();
        reg.add_credential("a").unwrap();
        assert!(matches!(reg.generate_proof(1), Err(AuthError::NotFound(_))));
    }

    #[test]
    fn register_writes_history() {
        let reg = registry();
        let first = reg.register("a").unwrap();
        let second = reg.register("b").unwrap();

        assert_eq!(first.leaf_index, 0);
        assert_eq!(second.leaf_index, 1);
        assert_eq!(second.node.previous_root, first.node.root_after);
        assert_eq!(first.node.previous_root, field_to_hex(&hasher::padding()));

        let nodes = reg.node_history("b").unwrap();
        assert_eq!(nodes, vec![second.node.clone()]);
        let roots = reg.root_history("b").unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].leaf_count, 2);
    }

    #[test]
    fn historical_proof_goes_stale() {
        let reg = registry();
        let first = reg.register("a").unwrap();
        reg.register("b").unwrap();
        // Still a valid path to the root it was issued against...
        assert!(first.proof.verify());
        // ...but not to the current one.
        let (root, _) = reg.get_root().unwrap();
        assert_ne!(first.proof.root, field_to_hex(&root));
        assert!(reg.generate_proof(0).unwrap().verify());
    }

    #[test]
    fn index_of_registered_credential() {
        let reg = registry();
        reg.add_credential("a").unwrap();
        reg.add_credential("b").unwrap();
        assert_eq!(reg.index_of("b").unwrap(), 1);
        assert!(matches!(reg.index_of("z"), Err(AuthError::NotFound(_))));
    }

    #[test]
    fn failed_list_append_releases_the_credential() {
        let store = Arc::new(FlakyListStore::default());
        let reg = CredentialRegistry::new(store.clone(), clock::system(), 16);

        store.fail_appends.store(true, Ordering::SeqCst);
        assert!(matches!(reg.register("a"), Err(AuthError::Store(_))));
        assert!(!reg.exists("a").unwrap());
        assert_eq!(reg.get_root().unwrap().1, 0);

        store.fail_appends.store(false, Ordering::SeqCst);
        let registration = reg.register("a").unwrap();
        assert_eq!(registration.leaf_index, 0);
        assert!(registration.proof.verify());
    }

    #[test]
    fn full_registry_rejects_new_credentials() {
        let reg = CredentialRegistry::new(
            Arc::new(MemoryStore::new()),
            clock::system(),
            CredentialRegistry::capacity_for_depth(1),
        );
        reg.register("a").unwrap();
        reg.register("b").unwrap();
        assert!(matches!(reg.register("c"), Err(AuthError::Validation(_))));
        assert!(matches!(reg.register("a"), Err(AuthError::Conflict(_))));
        assert!(!reg.exists("c").unwrap());
        assert_eq!(reg.build_tree().unwrap().1, 1);
    }

    #[test]
    fn concurrent_registrations_stop_at_capacity() {
        for _ in 0..20 {
            let reg = Arc::new(CredentialRegistry::new(
                Arc::new(MemoryStore::new()),
                clock::system(),
                CredentialRegistry::capacity_for_depth(1),
            ));
            reg.register("seed").unwrap();

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let reg = reg.clone();
                    std::thread::spawn(move || reg.register(&format!("racer-{i}")).is_ok())
                })
                .collect();
            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();

            assert_eq!(admitted, 1);
            let (_, count) = reg.get_root().unwrap();
            assert_eq!(count, 2);
            assert_eq!(reg.build_tree().unwrap().1, 1);
        }
    }

    #[test]
    fn capacity_for_depth_saturates() {
        assert_eq!(CredentialRegistry::capacity_for_depth(0), 1);
        assert_eq!(CredentialRegistry::capacity_for_depth(20), 1 << 20);
        assert_eq!(CredentialRegistry::capacity_for_depth(64), u64::MAX);
    }

    #[test]
    fn depth_is_recorded_per_root() {
        let reg = registry();
        let first = reg.register("a").unwrap();
        reg.register("b").unwrap();
        let third = reg.register("c").unwrap();

        let root_of = |hex: &str| crate::crypto::hash::field_from_hex(hex).unwrap();
        assert_eq!(reg.depth_of_root(&root_of(&first.proof.root)).unwrap(), Some(0));
        assert_eq!(reg.depth_of_root(&root_of(&third.proof.root)).unwrap(), Some(2));
        assert_eq!(reg.depth_of_root(&leaf_for("not a root")).unwrap(), None);
    }

    #[test]
    fn depth_of_current_root_without_history() {
        let reg = registry();
        for c in ["a", "b", "c", "d", "e"] {
            reg.add_credential(c).unwrap();
        }
        let (root, _) = reg.get_root().unwrap();
        assert_eq!(reg.depth_of_root(&root).unwrap(), Some(3));
    }

    #[test]
    fn concurrent_registrations_get_distinct_indices() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.register(&format!("cred-{i}")).unwrap())
            })
            .collect();
        let mut indices: Vec<u64> = handles
            .into_iter()
            .map(|h| {
                let registration = h.join().unwrap();
                // The proof was computed against the tree that contained it.
                assert!(registration.proof.verify());
                registration.leaf_index
            })
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
    }
}
