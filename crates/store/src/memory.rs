//! In-memory record store for unit testing
//!
//! Mirrors the backend contract without requiring a running etcd
//! cluster. The store can be configured to reproduce failure scenarios:
//! injected write failures for specific keys, and a simulated concurrent
//! writer that makes every conditional write on a key lose.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::kv::{CasOutcome, KvStore, Version, VersionedValue, DEFAULT_MAX_TXN_OPS};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Vec<u8>,
    version: Version,
}

/// In-memory [`KvStore`] for testing.
///
/// Clones share state, so a test can hand the store to the code under
/// test and keep a handle for setup and assertions.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, StoredEntry>>>,
    failing_keys: Arc<Mutex<HashSet<String>>>,
    contended_keys: Arc<Mutex<HashSet<String>>>,
    max_txn_ops: usize,
}

impl MemoryStore {
    /// Create an empty store with the default transaction cap.
    pub fn new() -> Self {
        Self::with_max_txn_ops(DEFAULT_MAX_TXN_OPS)
    }

    /// Create an empty store with a custom transaction cap, so chunking
    /// behavior is testable with small batches.
    pub fn with_max_txn_ops(max_txn_ops: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            failing_keys: Arc::new(Mutex::new(HashSet::new())),
            contended_keys: Arc::new(Mutex::new(HashSet::new())),
            max_txn_ops,
        }
    }

    /// Make every unconditional write (`put`, `txn_put`) touching `key`
    /// fail (for test setup).
    pub fn fail_puts_on(&self, key: impl Into<String>) {
        self.failing_keys.lock().unwrap().insert(key.into());
    }

    /// Simulate a concurrent writer on `key`: every conditional write
    /// observes a version bump first and therefore loses (for test setup).
    pub fn contend_on(&self, key: impl Into<String>) {
        self.contended_keys.lock().unwrap().insert(key.into());
    }

    /// Whether a key currently exists (for test assertions).
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    /// Number of stored keys (for test assertions).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the store is empty (for test assertions).
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
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
            .field("len", &self.len())
            .field("max_txn_ops", &self.max_txn_ops)
            .finish()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<VersionedValue, StoreError> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) => Ok(VersionedValue {
                value: entry.value.clone(),
                version: entry.version,
            }),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Version, StoreError> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(StoreError::Backend(format!("injected put failure: {key}")));
        }
        let mut entries = self.entries.lock().unwrap();
        let version = match entries.get(key) {
            Some(existing) => existing.version.next(),
            None => Version::BASE,
        };
        entries.insert(key.to_string(), StoredEntry { value, version });
        Ok(version)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn get_and_delete(&self, key: &str) -> Result<VersionedValue, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.remove(key) {
            Some(entry) => Ok(VersionedValue {
                value: entry.value,
                version: entry.version,
            }),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Version,
        value: Vec<u8>,
    ) -> Result<CasOutcome, StoreError> {
        let mut entries = self.entries.lock().unwrap();

        // A configured concurrent writer always gets there first.
        if self.contended_keys.lock().unwrap().contains(key) {
            if let Some(entry) = entries.get_mut(key) {
                entry.version = entry.version.next();
            }
        }

        match entries.get(key) {
            Some(entry) if entry.version == expected => {
                let version = expected.next();
                entries.insert(key.to_string(), StoredEntry { value, version });
                Ok(CasOutcome::Applied(version))
            }
            Some(entry) => Ok(CasOutcome::Conflict(VersionedValue {
                value: entry.value.clone(),
                version: entry.version,
            })),
            None if expected == Version::NONE => {
                entries.insert(
                    key.to_string(),
                    StoredEntry {
                        value,
                        version: Version::BASE,
                    },
                );
                Ok(CasOutcome::Applied(Version::BASE))
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn txn_put(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StoreError> {
        if entries.len() > self.max_txn_ops {
            return Err(StoreError::TxnTooLarge(entries.len(), self.max_txn_ops));
        }
        let failing = self.failing_keys.lock().unwrap();
        if let Some((key, _)) = entries.iter().find(|(key, _)| failing.contains(key)) {
            // The whole transaction aborts; none of this batch lands.
            return Err(StoreError::Backend(format!("injected put failure: {key}")));
        }
        drop(failing);
        let mut stored = self.entries.lock().unwrap();
        for (key, value) in entries {
            let version = match stored.get(key) {
                Some(existing) => existing.version.next(),
                None => Version::BASE,
            };
            stored.insert(
                key.clone(),
                StoredEntry {
                    value: value.clone(),
                    version,
                },
            );
        }
        Ok(())
    }

    fn max_txn_ops(&self) -> usize {
        self.max_txn_ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_version_sequence() {
        let store = MemoryStore::new();

        assert_eq!(store.put("k", b"a".to_vec()).await.unwrap(), Version::BASE);
        assert_eq!(
            store.put("k", b"b".to_vec()).await.unwrap(),
            Version::BASE.next()
        );

        let read = store.get("k").await.unwrap();
        assert_eq!(read.value, b"b".to_vec());
        assert_eq!(read.version, Version::BASE.next());
    }

    #[tokio::test]
    async fn test_version_resets_after_delete() {
        let store = MemoryStore::new();

        store.put("k", b"a".to_vec()).await.unwrap();
        store.put("k", b"b".to_vec()).await.unwrap();
        store.delete("k").await.unwrap();

        // Re-creation starts the counter over.
        assert_eq!(store.put("k", b"c".to_vec()).await.unwrap(), Version::BASE);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_and_delete_returns_last_value() {
        let store = MemoryStore::new();
        store.put("k", b"a".to_vec()).await.unwrap();

        let last = store.get_and_delete("k").await.unwrap();
        assert_eq!(last.value, b"a".to_vec());
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.get_and_delete("k").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_put_applies_on_matching_version() {
        let store = MemoryStore::new();
        let version = store.put("k", b"a".to_vec()).await.unwrap();

        let outcome = store
            .compare_and_put("k", version, b"b".to_vec())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied(version.next()));
        assert_eq!(store.get("k").await.unwrap().value, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_compare_and_put_conflict_returns_stored_value() {
        let store = MemoryStore::new();
        store.put("k", b"a".to_vec()).await.unwrap();
        let current = store.put("k", b"b".to_vec()).await.unwrap();

        // Stale token: the store is untouched and the stored record comes back.
        let outcome = store
            .compare_and_put("k", Version::BASE, b"c".to_vec())
            .await
            .unwrap();
        match outcome {
            CasOutcome::Conflict(stored) => {
                assert_eq!(stored.value, b"b".to_vec());
                assert_eq!(stored.version, current);
            }
            CasOutcome::Applied(_) => panic!("stale write must not apply"),
        }
        assert_eq!(store.get("k").await.unwrap().value, b"b".to_vec());
    }

    #[tokio::test]
    async fn test_compare_and_put_none_creates_key() {
        let store = MemoryStore::new();

        let outcome = store
            .compare_and_put("k", Version::NONE, b"a".to_vec())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Applied(Version::BASE));
    }

    #[tokio::test]
    async fn test_compare_and_put_absent_key_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.compare_and_put("k", Version::BASE, b"a".to_vec()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_contended_key_always_loses() {
        let store = MemoryStore::new();
        let version = store.put("k", b"a".to_vec()).await.unwrap();
        store.contend_on("k");

        let outcome = store
            .compare_and_put("k", version, b"b".to_vec())
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Conflict(_)));
    }

    #[tokio::test]
    async fn test_txn_put_respects_op_cap() {
        let store = MemoryStore::with_max_txn_ops(2);
        let batch = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
            ("c".to_string(), b"3".to_vec()),
        ];
        assert!(matches!(
            store.txn_put(&batch).await,
            Err(StoreError::TxnTooLarge(3, 2))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_txn_put_aborts_whole_batch_on_injected_failure() {
        let store = MemoryStore::new();
        store.fail_puts_on("b");

        let batch = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];
        assert!(store.txn_put(&batch).await.is_err());
        assert!(!store.contains_key("a"));
    }
}
